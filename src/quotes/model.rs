/// Data model for the quote table.
/// One record per minute of the day, split into three styled runs.
use std::fmt;
use std::str::FromStr;

use chrono::Timelike;
use thiserror::Error;

/// Number of minutes a complete table covers
pub const MINUTES_PER_DAY: usize = 24 * 60;

/// Minute-of-day key, displayed as zero-padded 24-hour `HH:MM`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeKey {
    hour: u8,
    minute: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid time key `{0}`, expected HH:MM")]
pub struct TimeKeyError(pub String);

impl TimeKey {
    pub fn new(hour: u8, minute: u8) -> Option<Self> {
        (hour < 24 && minute < 60).then_some(Self { hour, minute })
    }

    /// Build from minutes since midnight (wraps past 23:59)
    pub fn from_minute_of_day(minutes: u16) -> Self {
        let m = minutes as usize % MINUTES_PER_DAY;
        Self {
            hour: (m / 60) as u8,
            minute: (m % 60) as u8,
        }
    }

    /// Truncate any chrono time value to its minute
    pub fn from_time<T: Timelike>(t: &T) -> Self {
        Self {
            hour: t.hour() as u8,
            minute: t.minute() as u8,
        }
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn minute(&self) -> u8 {
        self.minute
    }

    pub fn minute_of_day(&self) -> u16 {
        self.hour as u16 * 60 + self.minute as u16
    }

    /// Every key from 00:00 through 23:59
    pub fn all() -> impl Iterator<Item = TimeKey> {
        (0..MINUTES_PER_DAY as u16).map(Self::from_minute_of_day)
    }
}

impl fmt::Display for TimeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for TimeKey {
    type Err = TimeKeyError;

    /// Accepts `HH:MM` and the unpadded `H:MM` some tables use
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || TimeKeyError(s.to_string());
        let (h, m) = s.trim().split_once(':').ok_or_else(bad)?;
        if h.is_empty() || h.len() > 2 || m.len() != 2 {
            return Err(bad());
        }
        if !h.bytes().chain(m.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(bad());
        }
        let hour: u8 = h.parse().map_err(|_| bad())?;
        let minute: u8 = m.parse().map_err(|_| bad())?;
        TimeKey::new(hour, minute).ok_or_else(bad)
    }
}

/// Which of the three styled segments a piece of text belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunId {
    Prefix,
    TimePhrase,
    Suffix,
}

impl RunId {
    /// Reading order
    pub const ALL: [RunId; 3] = [RunId::Prefix, RunId::TimePhrase, RunId::Suffix];

    pub fn index(self) -> usize {
        match self {
            RunId::Prefix => 0,
            RunId::TimePhrase => 1,
            RunId::Suffix => 2,
        }
    }
}

/// One row of the quote table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteRecord {
    pub time: TimeKey,
    pub time_phrase: String,
    pub prefix: String,
    pub suffix: String,
    pub book: String,
    pub author: String,
}

impl QuoteRecord {
    /// The three runs in reading order
    pub fn runs(&self) -> [&str; 3] {
        [&self.prefix, &self.time_phrase, &self.suffix]
    }

    pub fn run(&self, id: RunId) -> &str {
        self.runs()[id.index()]
    }
}

impl fmt::Display for QuoteRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} ", self.time, self.prefix)?;
        write!(f, "*{}* {}", self.time_phrase, self.suffix)?;
        if !self.book.is_empty() || !self.author.is_empty() {
            write!(f, " ({}, {})", self.book, self.author)?;
        }
        Ok(())
    }
}
