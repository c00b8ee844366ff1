//! VAST 3.0 ad-response codec.
//!
//! Every selected ad becomes one inline `<Ad>` with a single linear creative
//! and one progressive MP4 media file. Media attributes are fixed: players
//! receive 1280x720 `video/mp4` regardless of the underlying asset.

use quick_xml::de::from_str;
use quick_xml::se::Serializer;
use serde::{Deserialize, Serialize};
use spotline_core::{Ad, SpotlineError, SpotlineResult};

pub const VAST_VERSION: &str = "3.0";
pub const AD_SYSTEM: &str = "Spotline Ad Server";
pub const AD_TITLE: &str = "Inline Video Ad";
pub const DELIVERY: &str = "progressive";
pub const MEDIA_TYPE: &str = "video/mp4";
pub const MEDIA_WIDTH: u32 = 1280;
pub const MEDIA_HEIGHT: u32 = 720;
pub const CONTENT_TYPE: &str = "application/xml";

const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vast {
    #[serde(rename = "@version")]
    pub version: String,
    #[serde(rename = "Ad", default)]
    pub ads: Vec<VastAd>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VastAd {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "InLine")]
    pub inline: InLine,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InLine {
    #[serde(rename = "AdSystem")]
    pub ad_system: String,
    #[serde(rename = "AdTitle")]
    pub ad_title: String,
    #[serde(rename = "Creatives")]
    pub creatives: Creatives,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Creatives {
    #[serde(rename = "Creative", default)]
    pub creatives: Vec<Creative>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Creative {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "Linear")]
    pub linear: Linear,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Linear {
    #[serde(rename = "Duration")]
    pub duration: String,
    #[serde(rename = "MediaFiles")]
    pub media_files: MediaFiles,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaFiles {
    #[serde(rename = "MediaFile", default)]
    pub media_files: Vec<MediaFile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaFile {
    #[serde(rename = "@delivery")]
    pub delivery: String,
    #[serde(rename = "@type")]
    pub media_type: String,
    #[serde(rename = "@width")]
    pub width: u32,
    #[serde(rename = "@height")]
    pub height: u32,
    #[serde(rename = "$text")]
    pub url: String,
}

/// Whole seconds as `HH:MM:SS`. Hours are not wrapped.
pub fn timecode(secs: u32) -> String {
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

impl Vast {
    pub fn from_ads(ads: &[Ad]) -> Self {
        Self {
            version: VAST_VERSION.to_string(),
            ads: ads.iter().map(VastAd::from).collect(),
        }
    }
}

impl From<&Ad> for VastAd {
    fn from(ad: &Ad) -> Self {
        Self {
            id: ad.id.clone(),
            inline: InLine {
                ad_system: AD_SYSTEM.to_string(),
                ad_title: AD_TITLE.to_string(),
                creatives: Creatives {
                    creatives: vec![Creative {
                        id: ad.creative_id.clone(),
                        linear: Linear {
                            duration: timecode(ad.duration_secs),
                            media_files: MediaFiles {
                                media_files: vec![MediaFile {
                                    delivery: DELIVERY.to_string(),
                                    media_type: MEDIA_TYPE.to_string(),
                                    width: MEDIA_WIDTH,
                                    height: MEDIA_HEIGHT,
                                    url: ad.media_url.clone(),
                                }],
                            },
                        },
                    }],
                },
            },
        }
    }
}

/// Render the ad response. An empty slice yields a valid document with no
/// `<Ad>` elements.
pub fn render(ads: &[Ad]) -> SpotlineResult<String> {
    let vast = Vast::from_ads(ads);
    let mut body = String::new();
    let mut serializer = Serializer::with_root(&mut body, Some("VAST"))
        .map_err(|e| SpotlineError::Codec(e.to_string()))?;
    serializer.indent(' ', 2);
    vast.serialize(serializer)
        .map_err(|e| SpotlineError::Codec(e.to_string()))?;
    Ok(format!("{XML_DECLARATION}\n{body}"))
}

/// Parse a VAST document produced by [`render`].
pub fn parse(xml: &str) -> SpotlineResult<Vast> {
    from_str(xml).map_err(|e| SpotlineError::Codec(e.to_string()))
}
