use quarry_split::Split;

use super::{merged_input, OpStats, Operator};
use crate::error::OpError;
use crate::io::{SplitSink, SplitSource};

/// Pass through the first `count` rows. The rest of the input is still read
/// to end of stream so upstream writers are never left blocked.
pub struct Limit {
    pub count: u64,
}

impl Operator for Limit {
    fn name(&self) -> &'static str {
        "limit"
    }

    fn run(
        &mut self,
        inputs: Vec<Box<dyn SplitSource>>,
        sink: &mut dyn SplitSink,
    ) -> Result<OpStats, OpError> {
        let mut input = merged_input(inputs)?;
        let md = input.read_metadata()?;
        sink.write_metadata(&md)?;

        let mut stats = OpStats::default();
        while let Some(split) = input.read_split()? {
            stats.rows_in += split.num_rows() as u64;
            let remaining = self.count.saturating_sub(stats.rows_out);
            if remaining == 0 {
                continue;
            }
            let take = (split.num_rows() as u64).min(remaining) as usize;
            let out: Split = if take == split.num_rows() {
                split
            } else {
                split.slice(0, take)
            };
            stats.rows_out += out.num_rows() as u64;
            if !out.is_empty() {
                sink.write_split(&out)?;
            }
        }
        Ok(stats)
    }
}
