use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::core::error::ParseError;

pub type JobId = Uuid;

/// Release asset record as returned by the releases API.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    pub browser_download_url: String,
    #[serde(default)]
    pub size: u64,
}

impl ReleaseAsset {
    pub fn new(name: impl Into<String>, browser_download_url: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            browser_download_url: browser_download_url.into(),
            size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    #[serde(rename = "arm")]
    Arm,
    #[serde(rename = "arm64")]
    Arm64,
    #[serde(rename = "x86")]
    X86,
    #[serde(rename = "x86_64")]
    X86_64,
}

impl Platform {
    pub const ALL: [Platform; 4] = [Platform::Arm, Platform::Arm64, Platform::X86, Platform::X86_64];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Arm => "arm",
            Platform::Arm64 => "arm64",
            Platform::X86 => "x86",
            Platform::X86_64 => "x86_64",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Android {
    #[serde(rename = "4.4")]
    V4_4,
    #[serde(rename = "5.0")]
    V5_0,
    #[serde(rename = "5.1")]
    V5_1,
    #[serde(rename = "6.0")]
    V6_0,
    #[serde(rename = "7.0")]
    V7_0,
    #[serde(rename = "7.1")]
    V7_1,
    #[serde(rename = "8.0")]
    V8_0,
    #[serde(rename = "8.1")]
    V8_1,
    #[serde(rename = "9.0")]
    V9_0,
    #[serde(rename = "10.0")]
    V10_0,
    #[serde(rename = "11.0")]
    V11_0,
}

impl Android {
    pub const ALL: [Android; 11] = [
        Android::V4_4,
        Android::V5_0,
        Android::V5_1,
        Android::V6_0,
        Android::V7_0,
        Android::V7_1,
        Android::V8_0,
        Android::V8_1,
        Android::V9_0,
        Android::V10_0,
        Android::V11_0,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Android::V4_4 => "4.4",
            Android::V5_0 => "5.0",
            Android::V5_1 => "5.1",
            Android::V6_0 => "6.0",
            Android::V7_0 => "7.0",
            Android::V7_1 => "7.1",
            Android::V8_0 => "8.0",
            Android::V8_1 => "8.1",
            Android::V9_0 => "9.0",
            Android::V10_0 => "10.0",
            Android::V11_0 => "11.0",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Variant {
    #[serde(rename = "pico")]
    Pico,
    #[serde(rename = "nano")]
    Nano,
    #[serde(rename = "micro")]
    Micro,
    #[serde(rename = "mini")]
    Mini,
    #[serde(rename = "full")]
    Full,
    #[serde(rename = "stock")]
    Stock,
    #[serde(rename = "super")]
    Super,
    #[serde(rename = "aroma")]
    Aroma,
    #[serde(rename = "tvstock")]
    TvStock,
    #[serde(rename = "tvmini")]
    TvMini,
}

impl Variant {
    pub const ALL: [Variant; 10] = [
        Variant::Pico,
        Variant::Nano,
        Variant::Micro,
        Variant::Mini,
        Variant::Full,
        Variant::Stock,
        Variant::Super,
        Variant::Aroma,
        Variant::TvStock,
        Variant::TvMini,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::Pico => "pico",
            Variant::Nano => "nano",
            Variant::Micro => "micro",
            Variant::Mini => "mini",
            Variant::Full => "full",
            Variant::Stock => "stock",
            Variant::Super => "super",
            Variant::Aroma => "aroma",
            Variant::TvStock => "tvstock",
            Variant::TvMini => "tvmini",
        }
    }
}

impl FromStr for Platform {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| ParseError::Platform(s.to_string()))
    }
}

impl FromStr for Android {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| ParseError::Android(s.to_string()))
    }
}

impl FromStr for Variant {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| ParseError::Variant(s.to_string()))
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Android {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One OpenGApps artifact. Only the parser builds these; the mirror fields
/// are filled in by [`Package::create_mirror`](crate::core::mirror).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Package {
    pub(crate) name: String,
    pub(crate) date: String,
    pub(crate) origin_url: String,
    pub(crate) local_url: Option<String>,
    pub(crate) remote_url: Option<String>,
    pub(crate) md5: String,
    pub(crate) size: u64,
    pub(crate) platform: Platform,
    pub(crate) android: Android,
    pub(crate) variant: Variant,
}

impl Package {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn date(&self) -> &str {
        &self.date
    }

    pub fn origin_url(&self) -> &str {
        &self.origin_url
    }

    pub fn local_url(&self) -> Option<&str> {
        self.local_url.as_deref()
    }

    pub fn remote_url(&self) -> Option<&str> {
        self.remote_url.as_deref()
    }

    pub fn md5(&self) -> &str {
        &self.md5
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn android(&self) -> Android {
        self.android
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    /// Restores mirror URLs recorded by an earlier run, so that an already
    /// mirrored package is not transferred again.
    pub fn with_mirrors(mut self, local_url: Option<String>, remote_url: Option<String>) -> Self {
        self.local_url = local_url.filter(|u| !u.is_empty());
        self.remote_url = remote_url.filter(|u| !u.is_empty());
        self
    }
}

/// A single `add_*` request inside the download queue. Lives for the
/// duration of that call only.
#[derive(Debug, Clone)]
pub struct DownloadJob {
    pub id: JobId,
    pub url: String,
    pub expected_md5: Option<String>,
    pub expected_size: Option<u64>,
    pub max_retries: u32,
    pub concurrency: usize,
}

impl DownloadJob {
    pub fn single(url: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            url: url.to_string(),
            expected_md5: None,
            expected_size: None,
            max_retries: 1,
            concurrency: 1,
        }
    }

    pub fn verified(url: &str, md5: &str, max_retries: u32, size: u64, concurrency: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            url: url.to_string(),
            expected_md5: Some(md5.trim().to_ascii_lowercase()).filter(|m| !m.is_empty()),
            expected_size: Some(size).filter(|s| *s > 0),
            max_retries: max_retries.max(1),
            concurrency: concurrency.max(1),
        }
    }
}
