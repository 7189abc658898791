use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TableError {
    #[error("frequency table has {0} entries, need at least 2")]
    TooShort(usize),

    #[error("frequency table is not strictly ascending at position {0}")]
    NotAscending(usize),
}

/// Supported clock frequencies (kHz) of the reference core, ascending.
///
/// The table is read once and never changes afterwards, so lookups can work
/// over the full bounds every time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrequencyTable {
    freqs_khz: Vec<u32>,
}

impl FrequencyTable {
    pub fn new(freqs_khz: Vec<u32>) -> Result<Self, TableError> {
        if freqs_khz.len() < 2 {
            return Err(TableError::TooShort(freqs_khz.len()));
        }

        if let Some(pos) = freqs_khz.windows(2).position(|w| w[0] >= w[1]) {
            return Err(TableError::NotAscending(pos + 1));
        }

        Ok(Self { freqs_khz })
    }

    /// Position of `khz` in the table, or `None` if the table has no such
    /// entry. Position 0 is a regular match.
    pub fn position(&self, khz: u32) -> Option<usize> {
        self.freqs_khz.binary_search(&khz).ok()
    }

    pub fn get(&self, index: usize) -> Option<u32> {
        self.freqs_khz.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.freqs_khz.len()
    }

    pub fn is_empty(&self) -> bool {
        self.freqs_khz.is_empty()
    }

    pub fn max_khz(&self) -> u32 {
        // Construction guarantees at least two entries.
        self.freqs_khz[self.freqs_khz.len() - 1]
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.freqs_khz
    }
}

impl TryFrom<Vec<u32>> for FrequencyTable {
    type Error = TableError;

    fn try_from(freqs_khz: Vec<u32>) -> Result<Self, Self::Error> {
        Self::new(freqs_khz)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msm8974_table() -> FrequencyTable {
        FrequencyTable::new(vec![
            300_000, 422_400, 652_800, 729_600, 883_200, 960_000, 1_036_800, 1_190_400,
            1_267_200, 1_497_600, 1_574_400, 1_728_000, 1_958_400, 2_265_600,
        ])
        .unwrap()
    }

    #[test]
    fn should_find_every_entry() {
        let table = msm8974_table();
        for (index, &khz) in table.as_slice().iter().enumerate() {
            assert_eq!(table.position(khz), Some(index));
        }
    }

    #[test]
    fn should_distinguish_first_entry_from_missing() {
        let table = msm8974_table();
        assert_eq!(table.position(300_000), Some(0));
        assert_eq!(table.position(299_999), None);
    }

    #[test]
    fn should_return_none_for_frequencies_between_entries() {
        let table = msm8974_table();
        assert_eq!(table.position(1_000_000), None);
        assert_eq!(table.position(3_000_000), None);
        assert_eq!(table.position(0), None);
    }

    #[test]
    fn should_be_idempotent_regardless_of_call_order() {
        let table = msm8974_table();
        let forward: Vec<_> = [1_728_000, 300_000, 42, 2_265_600]
            .iter()
            .map(|&khz| table.position(khz))
            .collect();
        let backward: Vec<_> = [2_265_600, 42, 300_000, 1_728_000]
            .iter()
            .map(|&khz| table.position(khz))
            .rev()
            .collect();

        assert_eq!(forward, backward);
        assert_eq!(forward, vec![Some(11), Some(0), None, Some(13)]);
    }

    #[test]
    fn should_reject_short_tables() {
        assert_eq!(FrequencyTable::new(vec![]), Err(TableError::TooShort(0)));
        assert_eq!(
            FrequencyTable::new(vec![300_000]),
            Err(TableError::TooShort(1))
        );
    }

    #[test]
    fn should_reject_unordered_tables() {
        assert_eq!(
            FrequencyTable::new(vec![300_000, 960_000, 652_800]),
            Err(TableError::NotAscending(2))
        );
        assert_eq!(
            FrequencyTable::new(vec![300_000, 300_000]),
            Err(TableError::NotAscending(1))
        );
    }

    #[test]
    fn should_report_highest_frequency() {
        assert_eq!(msm8974_table().max_khz(), 2_265_600);
    }
}
