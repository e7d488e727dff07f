use super::{CompactionStats, CompactionType, Compactor};
use crate::{
    engine::{Rowset, Tablet, Version},
    error::*,
};

/// Just merges every candidate rowset into one when there are at least X of them.
///
/// Candidates are picked around the tablet's cumulative point:
/// base takes everything below it, cumulative everything at or above it, full takes all.
#[derive(Clone, Debug)]
pub struct RowsetMergeCompactor {
    min_input_rowsets: usize,
}

impl Default for RowsetMergeCompactor {
    fn default() -> Self {
        Self {
            min_input_rowsets: 2,
        }
    }
}

impl RowsetMergeCompactor {
    pub fn new(min_input_rowsets: usize) -> Self {
        Self {
            min_input_rowsets: min_input_rowsets.max(1),
        }
    }

    fn pick(&self, tablet: &Tablet, kind: CompactionType) -> Result<Vec<Rowset>> {
        let point = tablet.cumulative_point();
        let picked = tablet
            .rowsets()
            .into_iter()
            .filter(|rowset| match kind {
                CompactionType::Base => rowset.version.end < point,
                CompactionType::Cumulative => rowset.version.start >= point,
                CompactionType::Full => true,
            })
            .collect::<Vec<_>>();
        if picked.len() < self.min_input_rowsets {
            return Err(Error::Internal(format!(
                "no suitable versions for {} compaction of tablet {}: {} candidate rowsets",
                kind,
                tablet.id(),
                picked.len()
            )));
        }
        Ok(picked)
    }

    ///
    /// Returns the versions that were merged as well as the new rowset
    fn merge(to_merge: &[Rowset]) -> Result<(Vec<Version>, Rowset)> {
        let (first, last) = match (to_merge.first(), to_merge.last()) {
            (Some(first), Some(last)) => (first.version, last.version),
            _ => return Err(Error::Internal(String::from("nothing to merge"))),
        };
        let merged = Rowset {
            version: Version::new(first.start, last.end),
            num_rows: to_merge.iter().map(|r| r.num_rows).sum(),
            data_size: to_merge.iter().map(|r| r.data_size).sum(),
            num_segments: 1,
            overlapping: false,
        };
        Ok((to_merge.iter().map(|r| r.version).collect(), merged))
    }
}

impl Compactor for RowsetMergeCompactor {
    fn compact(
        &self,
        tablet: &Tablet,
        kind: CompactionType,
        remote: bool,
    ) -> Result<CompactionStats> {
        if remote && tablet.remote_storage().is_none() {
            return Err(Error::Internal(format!(
                "tablet {} has no remote storage to fetch rowsets from",
                tablet.id()
            )));
        }
        let to_merge = self.pick(tablet, kind)?;
        let (inputs, merged) = Self::merge(&to_merge)?;
        let output_version = merged.version;
        let stats = CompactionStats {
            input_rowsets: to_merge.len(),
            input_rows: merged.num_rows,
            input_bytes: merged.data_size,
            output_version,
            fetched_from_remote: remote,
        };
        let cumulative_point = match kind {
            CompactionType::Base => None,
            CompactionType::Cumulative | CompactionType::Full => Some(output_version.end + 1),
        };
        tablet.replace_rowsets(&inputs, merged, cumulative_point)?;
        log::debug!(
            "Merged {} rowsets of tablet {} into {}",
            stats.input_rowsets,
            tablet.id(),
            output_version
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::tablet::test::*;

    #[test]
    fn cumulative_merges_rowsets_and_advances_point() {
        let tablet = generate_tablet(1, 5);
        let stats = RowsetMergeCompactor::default()
            .compact(&tablet, CompactionType::Cumulative, false)
            .unwrap();
        assert_eq!(stats.input_rowsets, 5);
        assert_eq!(stats.input_rows, 50);
        assert_eq!(stats.output_version, Version::new(0, 4));
        assert_eq!(tablet.num_rowsets(), 1);
        assert_eq!(tablet.cumulative_point(), 5);
    }

    #[test]
    fn base_only_takes_rowsets_below_cumulative_point() {
        let tablet = generate_tablet(1, 4);
        let compactor = RowsetMergeCompactor::default();
        // nothing below the point yet
        assert!(compactor
            .compact(&tablet, CompactionType::Base, false)
            .is_err());

        compactor
            .compact(&tablet, CompactionType::Cumulative, false)
            .unwrap();
        for v in 4..7 {
            tablet
                .add_rowset(Rowset::new(Version::new(v, v), 1, 10))
                .unwrap();
        }
        compactor
            .compact(&tablet, CompactionType::Cumulative, false)
            .unwrap();
        let stats = compactor
            .compact(&tablet, CompactionType::Base, false)
            .unwrap();
        assert_eq!(stats.output_version, Version::new(0, 6));
        assert_eq!(
            tablet
                .rowsets()
                .into_iter()
                .map(|r| r.version)
                .collect::<Vec<_>>(),
            vec![Version::new(0, 6)]
        );
    }

    #[test]
    fn min_input_rowsets_gates_selection() {
        let tablet = generate_tablet(1, 2);
        let err = RowsetMergeCompactor::new(3)
            .compact(&tablet, CompactionType::Full, false)
            .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
        assert_eq!(tablet.num_rowsets(), 2);

        // never below a single rowset
        let stats = RowsetMergeCompactor::new(0)
            .compact(&generate_tablet(2, 1), CompactionType::Full, false)
            .unwrap();
        assert_eq!(stats.input_rowsets, 1);
    }

    #[test]
    fn remote_requires_remote_storage() {
        let tablet = generate_tablet(1, 3);
        let compactor = RowsetMergeCompactor::default();
        assert!(compactor
            .compact(&tablet, CompactionType::Full, true)
            .is_err());
        assert_eq!(tablet.num_rowsets(), 3);

        let tablet = generate_tablet(2, 3).with_remote_storage("s3://cold");
        let stats = compactor
            .compact(&tablet, CompactionType::Full, true)
            .unwrap();
        assert!(stats.fetched_from_remote);
        assert_eq!(tablet.num_rowsets(), 1);
    }
}
