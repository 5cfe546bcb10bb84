//! Grouping the peaks of independent channels into time-aligned rows.
use super::Positioned;
use crate::channels::{Channel, ChannelMap, ChannelSet};

/// One group of coincident peaks.
#[derive(Clone, Debug, PartialEq)]
pub struct PeakRow {
    /// Earliest position in the group.
    pub anchor: usize,
    /// Per channel, the index of the peak belonging to this group.
    pub cells: ChannelMap<Option<usize>>,
}

impl PeakRow {
    pub fn get(&self, channel: Channel) -> Option<usize> {
        self.cells[channel]
    }

    pub fn contains(&self, channel: Channel) -> bool {
        self.cells[channel].is_some()
    }
}

/// Rows of coincident peaks ordered by ascending anchor.
/// Each peak of each channel appears in exactly one row.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PeakMatrix {
    rows: Vec<PeakRow>,
}

impl PeakMatrix {
    pub fn rows(&self) -> &[PeakRow] {
        &self.rows
    }

    pub fn row(&self, index: usize) -> Option<&PeakRow> {
        self.rows.get(index)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Builds the [PeakMatrix] of `peaks`.
///
/// The earliest unconsumed peak of any channel anchors the next row; every
/// channel whose next peak lies less than `tolerance` samples from the
/// anchor contributes it to the row, the others are absent from it.
#[tracing::instrument(skip_all, level = "trace", fields(num_rows))]
pub fn correlate_peaks<P: Positioned>(
    channels: &ChannelSet,
    peaks: &ChannelMap<Vec<P>>,
    tolerance: usize,
) -> PeakMatrix {
    let mut cursors = ChannelMap::<usize>::default();
    let next_position = |cursors: &ChannelMap<usize>, channel: Channel| {
        peaks[channel].get(cursors[channel]).map(Positioned::position)
    };

    let mut rows = Vec::new();
    while let Some(anchor) = channels
        .iter()
        .filter_map(|channel| next_position(&cursors, channel))
        .min()
    {
        let mut cells = ChannelMap::<Option<usize>>::default();
        for channel in channels.iter() {
            let Some(position) = next_position(&cursors, channel) else {
                continue;
            };
            if position == anchor || position.abs_diff(anchor) < tolerance {
                cells[channel] = Some(cursors[channel]);
                cursors[channel] += 1;
            }
        }
        rows.push(PeakRow { anchor, cells });
    }

    tracing::Span::current().record("num_rows", rows.len());
    PeakMatrix { rows }
}
