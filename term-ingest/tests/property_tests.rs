//! Property-based tests for the staging naming convention and the
//! validation aggregate.
//!
//! ## Properties
//!
//! - Any well-formed chunk name parses back to its table and period
//! - Names with an extension, an invalid month or a reversed period never parse
//! - An aggregate keeps every result pushed into it and reports all-passed
//!   exactly when it is non-empty and nothing failed

use proptest::prelude::*;
use term_ingest::core::{ValidationAggregate, ValidationResult};
use term_ingest::discovery::{meta_table_name, ChunkName, YearMonth};

fn table_name() -> impl Strategy<Value = String> {
    "[a-z_][a-z0-9_]{0,16}"
}

fn year_month() -> impl Strategy<Value = YearMonth> {
    (1990u16..2100, 1u8..=12).prop_map(|(year, month)| YearMonth { year, month })
}

proptest! {
    #[test]
    fn test_chunk_name_round_trips(
        table in table_name(),
        a in year_month(),
        b in year_month(),
    ) {
        let (start, end) = if a <= b { (a, b) } else { (b, a) };
        let file_name = format!("{table}_{start}_{end}");

        let parsed = ChunkName::parse(&file_name);
        prop_assert!(parsed.is_some(), "{} should parse", file_name);
        let parsed = parsed.unwrap();
        prop_assert_eq!(parsed.table, table);
        prop_assert_eq!(parsed.period.start, start);
        prop_assert_eq!(parsed.period.end, end);
    }

    #[test]
    fn test_reversed_period_is_ignored(
        table in table_name(),
        a in year_month(),
        b in year_month(),
    ) {
        prop_assume!(a != b);
        let (start, end) = if a > b { (a, b) } else { (b, a) };
        let file_name = format!("{table}_{start}_{end}");
        prop_assert!(ChunkName::parse(&file_name).is_none());
    }

    #[test]
    fn test_names_with_extension_are_ignored(
        table in table_name(),
        start in year_month(),
        extension in "[a-z]{1,5}",
    ) {
        let file_name = format!("{table}_{start}_{start}.{extension}");
        prop_assert!(ChunkName::parse(&file_name).is_none());
    }

    #[test]
    fn test_invalid_month_is_ignored(
        table in table_name(),
        year in 1990u16..2100,
        month in prop_oneof![Just(0u8), 13u8..=99],
    ) {
        let file_name = format!("{table}_{year:04}{month:02}_{year:04}{month:02}");
        prop_assert!(ChunkName::parse(&file_name).is_none());
    }

    #[test]
    fn test_meta_name_round_trips(table in table_name()) {
        let file_name = format!("{table}.meta");
        prop_assert_eq!(meta_table_name(&file_name), Some(table.as_str()));
        prop_assert!(ChunkName::parse(&file_name).is_none());
    }

    #[test]
    fn test_aggregate_never_drops_results(
        outcomes in prop::collection::vec((0u64..100, 0u64..100), 0..10)
    ) {
        let mut aggregate = ValidationAggregate::new();
        for (i, (expected, actual)) in outcomes.iter().enumerate() {
            aggregate.push(ValidationResult::compare(
                format!("check_{i}"),
                *expected,
                *actual,
                format!("Expected {expected}, got {actual}"),
            ));
        }

        let failures = outcomes.iter().filter(|(e, a)| e != a).count();
        prop_assert_eq!(aggregate.len(), outcomes.len());
        prop_assert_eq!(aggregate.failed_results().count(), failures);
        prop_assert_eq!(
            aggregate.all_passed(),
            !outcomes.is_empty() && failures == 0
        );
    }
}
