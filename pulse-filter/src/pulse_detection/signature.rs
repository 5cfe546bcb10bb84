//! Presence/absence patterns over the rows of a [PeakMatrix].
use super::{PeakMatrix, PeakRow};
use crate::channels::ChannelSet;
use serde::Deserialize;
use std::{fmt, str::FromStr};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Marker {
    /// `+`: the channel must have a peak.
    Present,
    /// `-`: the channel must not have a peak.
    Absent,
    /// `*` or `.`: either.
    Any,
}

impl Marker {
    fn admits(self, has_peak: bool) -> bool {
        match self {
            Marker::Present => has_peak,
            Marker::Absent => !has_peak,
            Marker::Any => true,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Invalid marker {0:?}, expected one of '+', '-', '*', '.'")]
    InvalidMarker(char),
    #[error("Empty signature")]
    Empty,
}

impl TryFrom<char> for Marker {
    type Error = SignatureError;

    fn try_from(value: char) -> Result<Self, Self::Error> {
        match value {
            '+' => Ok(Marker::Present),
            '-' => Ok(Marker::Absent),
            '*' | '.' => Ok(Marker::Any),
            other => Err(SignatureError::InvalidMarker(other)),
        }
    }
}

impl From<Marker> for char {
    fn from(marker: Marker) -> Self {
        match marker {
            Marker::Present => '+',
            Marker::Absent => '-',
            Marker::Any => '*',
        }
    }
}

/// One marker per channel, in channel-set order, e.g. `"++-*"`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct Signature(Vec<Marker>);

impl Signature {
    pub fn markers(&self) -> &[Marker] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn matches(&self, channels: &ChannelSet, row: &PeakRow) -> bool {
        channels
            .iter()
            .zip(&self.0)
            .all(|(channel, marker)| marker.admits(row.contains(channel)))
    }
}

impl FromStr for Signature {
    type Err = SignatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let markers = s
            .trim()
            .chars()
            .map(Marker::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        if markers.is_empty() {
            return Err(SignatureError::Empty);
        }
        Ok(Self(markers))
    }
}

impl TryFrom<String> for Signature {
    type Error = SignatureError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0
            .iter()
            .try_for_each(|&marker| write!(f, "{}", char::from(marker)))
    }
}

/// Row `i` of the pattern constrains row `i` of the matrix. Matrix rows
/// beyond the pattern are unconstrained.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct SignaturePattern(Vec<Signature>);

impl SignaturePattern {
    pub fn new(rows: Vec<Signature>) -> Self {
        Self(rows)
    }

    pub fn rows(&self) -> &[Signature] {
        &self.0
    }

    pub fn matches(&self, channels: &ChannelSet, matrix: &PeakMatrix) -> bool {
        self.0.len() <= matrix.len()
            && self
                .0
                .iter()
                .zip(matrix.rows())
                .all(|(signature, row)| signature.matches(channels, row))
    }
}

impl fmt::Display for SignaturePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rows: Vec<_> = self.0.iter().map(Signature::to_string).collect();
        write!(f, "[{}]", rows.join(", "))
    }
}
