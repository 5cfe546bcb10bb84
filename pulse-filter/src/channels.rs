//! Channel identifiers, per-channel storage and the waveform record
//! handed to the pipeline by the transport.
use crate::pulse_detection::Real;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    ops::{Index, IndexMut},
};
use strum::{Display, EnumCount, EnumIter, EnumString, IntoStaticStr};
use thiserror::Error;

/// A digitiser input, i.e. one detector layer.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumCount,
    EnumIter,
    EnumString,
    IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Channel {
    Ch1,
    Ch2,
    Ch3,
    Ch4,
}

impl Channel {
    pub const ALL: [Channel; Channel::COUNT] =
        [Channel::Ch1, Channel::Ch2, Channel::Ch3, Channel::Ch4];

    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Fixed-size storage holding one value for every [Channel].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChannelMap<T>([T; Channel::COUNT]);

impl<T> ChannelMap<T> {
    pub fn from_fn<F: FnMut(Channel) -> T>(mut f: F) -> Self {
        Self(Channel::ALL.map(|channel| f(channel)))
    }

    pub fn iter(&self) -> impl Iterator<Item = (Channel, &T)> {
        Channel::ALL.into_iter().zip(self.0.iter())
    }

    pub fn map<U, F: FnMut(Channel, &T) -> U>(&self, mut f: F) -> ChannelMap<U> {
        ChannelMap::from_fn(|channel| f(channel, &self[channel]))
    }
}

impl<T> Index<Channel> for ChannelMap<T> {
    type Output = T;

    fn index(&self, channel: Channel) -> &T {
        &self.0[channel.index()]
    }
}

impl<T> IndexMut<Channel> for ChannelMap<T> {
    fn index_mut(&mut self, channel: Channel) -> &mut T {
        &mut self.0[channel.index()]
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("No channels given")]
    Empty,
    #[error("Channel {0} given more than once")]
    Duplicate(Channel),
}

/// The channels taking part in a run, in column order.
///
/// This order is the one used by peak matrices and signatures.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelSet(Vec<Channel>);

impl ChannelSet {
    pub fn new(channels: Vec<Channel>) -> Result<Self, ChannelError> {
        if channels.is_empty() {
            return Err(ChannelError::Empty);
        }
        let mut seen = ChannelMap::<bool>::default();
        for &channel in &channels {
            if std::mem::replace(&mut seen[channel], true) {
                return Err(ChannelError::Duplicate(channel));
            }
        }
        Ok(Self(channels))
    }

    pub fn iter(&self) -> impl Iterator<Item = Channel> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, channel: Channel) -> bool {
        self.0.contains(&channel)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error(transparent)]
    Channels(#[from] ChannelError),
    #[error("Channel {channel} has {found} samples, expected {expected}")]
    LengthMismatch {
        channel: Channel,
        expected: usize,
        found: usize,
    },
}

/// One event: a trace of equal length for every recorded channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<Channel, Vec<Real>>",
    into = "BTreeMap<Channel, Vec<Real>>"
)]
pub struct WaveformRecord {
    channels: ChannelSet,
    traces: ChannelMap<Vec<Real>>,
    num_samples: usize,
}

impl WaveformRecord {
    pub fn new<I>(traces: I) -> Result<Self, RecordError>
    where
        I: IntoIterator<Item = (Channel, Vec<Real>)>,
    {
        let (channels, traces): (Vec<_>, Vec<_>) = traces.into_iter().unzip();
        let channels = ChannelSet::new(channels)?;

        let mut record = Self {
            num_samples: traces.first().map(Vec::len).unwrap_or_default(),
            channels,
            traces: ChannelMap::default(),
        };
        for (channel, trace) in record.channels.iter().zip(traces) {
            if trace.len() != record.num_samples {
                return Err(RecordError::LengthMismatch {
                    channel,
                    expected: record.num_samples,
                    found: trace.len(),
                });
            }
            record.traces[channel] = trace;
        }
        Ok(record)
    }

    pub fn channels(&self) -> &ChannelSet {
        &self.channels
    }

    /// Returns the trace of `channel`, or `None` if it was not recorded.
    pub fn trace(&self, channel: Channel) -> Option<&[Real]> {
        self.channels
            .contains(channel)
            .then(|| self.traces[channel].as_slice())
    }

    pub fn num_samples(&self) -> usize {
        self.num_samples
    }
}

impl TryFrom<BTreeMap<Channel, Vec<Real>>> for WaveformRecord {
    type Error = RecordError;

    fn try_from(traces: BTreeMap<Channel, Vec<Real>>) -> Result<Self, Self::Error> {
        Self::new(traces)
    }
}

impl From<WaveformRecord> for BTreeMap<Channel, Vec<Real>> {
    fn from(mut record: WaveformRecord) -> Self {
        record
            .channels
            .iter()
            .map(|channel| (channel, std::mem::take(&mut record.traces[channel])))
            .collect()
    }
}
