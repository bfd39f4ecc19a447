use billpay_common::audit::AuditRecord;
use tracing::info;

use crate::classify::ClassifiedCollections;

/// Key of the trailer line appended to the merged collection.
pub const TOTAL_KEY: &str = "total";

/// Append the trailer to `merged` and record the merged count.
///
/// The count includes the trailer itself, so a non-empty collection of `n` records
/// reports `n + 1`; an empty one reports 0 and still gets a trailer. The trailer is
/// the digit 3 followed by the count zero padded to six digits.
pub fn compute_total(collections: &mut ClassifiedCollections, audit: &mut AuditRecord) -> String {
    let total = if collections.merged.is_empty() {
        0
    } else {
        collections.merged.len() + 1
    };
    let trailer = format!("3{total:06}");

    collections
        .merged
        .insert(TOTAL_KEY.to_owned(), trailer.clone());
    audit.merged_count = total;

    info!(total, trailer, "computed merged total");
    trailer
}

#[cfg(test)]
mod tests {
    use super::*;

    fn merged_of(size: usize) -> ClassifiedCollections {
        let mut collections = ClassifiedCollections::new();
        for i in 0..size {
            collections
                .merged
                .insert(format!("file.dat_{i}"), format!("record {i}"));
        }
        collections
    }

    #[test]
    fn test_total_counts_the_trailer() {
        let mut collections = merged_of(5);
        let mut audit = AuditRecord::default();

        assert_eq!(compute_total(&mut collections, &mut audit), "3000006");
        assert_eq!(audit.merged_count, 6);
        assert_eq!(collections.merged.len(), 6);
        assert_eq!(
            collections.merged.last(),
            Some((&TOTAL_KEY.to_owned(), &"3000006".to_owned()))
        );
    }

    #[test]
    fn test_empty_merged_gets_zero_trailer() {
        let mut collections = ClassifiedCollections::new();
        let mut audit = AuditRecord::default();

        assert_eq!(compute_total(&mut collections, &mut audit), "3000000");
        assert_eq!(audit.merged_count, 0);
        assert_eq!(collections.merged.get(TOTAL_KEY).map(String::as_str), Some("3000000"));
    }

    #[test]
    fn test_collisions_are_untouched() {
        let mut collections = merged_of(1);
        collections
            .collisions
            .insert("file.dat_3".to_owned(), "repeated".to_owned());

        compute_total(&mut collections, &mut AuditRecord::default());

        assert_eq!(collections.collisions.len(), 1);
        assert!(!collections.collisions.contains_key(TOTAL_KEY));
    }
}
