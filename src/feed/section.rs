use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Content category a feed is loaded for.
///
/// Declaration order is significant: it is the tie-breaker when the cache has
/// to evict between entries stored at the same instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Section {
  ForYou,
  Today,
  Opinion,
  Lifestyle,
  Cooking,
  Sports,
  Technology,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Unknown section: {0}")]
pub struct UnknownSection(pub String);

impl Section {
  pub const ALL: [Section; 7] = [
    Section::ForYou,
    Section::Today,
    Section::Opinion,
    Section::Lifestyle,
    Section::Cooking,
    Section::Sports,
    Section::Technology,
  ];

  /// Human readable title, also the wire representation.
  pub fn title(self) -> &'static str {
    match self {
      Section::ForYou => "For you",
      Section::Today => "Today",
      Section::Opinion => "Opinion",
      Section::Lifestyle => "Lifestyle",
      Section::Cooking => "Cooking",
      Section::Sports => "Sports",
      Section::Technology => "Technology",
    }
  }

  /// URL and command-line friendly name.
  pub fn slug(self) -> &'static str {
    match self {
      Section::ForYou => "for-you",
      Section::Today => "today",
      Section::Opinion => "opinion",
      Section::Lifestyle => "lifestyle",
      Section::Cooking => "cooking",
      Section::Sports => "sports",
      Section::Technology => "technology",
    }
  }
}

impl fmt::Display for Section {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.title())
  }
}

impl FromStr for Section {
  type Err = UnknownSection;

  /// Accepts either the slug or the title, case-insensitive.
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let needle = s.trim().to_lowercase();
    Section::ALL
      .into_iter()
      .find(|section| section.slug() == needle || section.title().to_lowercase() == needle)
      .ok_or_else(|| UnknownSection(s.to_string()))
  }
}

impl Serialize for Section {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(self.title())
  }
}

impl<'de> Deserialize<'de> for Section {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let raw = String::deserialize(deserializer)?;
    raw.parse().map_err(serde::de::Error::custom)
  }
}
