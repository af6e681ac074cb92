//! # Domain Model: Generation Records, Image Slots and Favorites
//!
//! This module defines the data that the local store persists and the sync
//! reconciler mirrors: [`GenerationRecord`], [`ImageData`], [`BlobKey`] and
//! [`FavoriteKey`].
//!
//! ## Image Data States
//!
//! Every field that holds image data is in exactly one of three states:
//!
//! ```text
//! Empty                    not produced yet, failed, or degraded after a missing blob
//! Reference(BlobKey)       bytes are durable in the blob store under this key
//! Inline(InlineImage)      raw, transient data:
//!     Handle(BlobKey)        session handle issued by the resolver (bytes already durable)
//!     Url(String)            network location, must be fetched
//!     DataUrl(String)        self-contained encoded payload
//!     Bytes { mime, bytes }  freshly produced payload
//! ```
//!
//! Persisted documents only ever contain `Empty` and `Reference` once the
//! resolver has dehydrated a record. Anything else found on disk is legacy
//! data and is migrated lazily on read (see [`crate::resolver`]).
//!
//! ## Wire Form
//!
//! On disk and on the wire an [`ImageData`] is a single string:
//!
//! | Form              | State                |
//! |-------------------|----------------------|
//! | `""`              | `Empty`              |
//! | `"ref:<key>"`     | `Reference`          |
//! | `"blob:<key>"`    | `Inline(Handle)`     |
//! | `"data:..."`      | `Inline(DataUrl)`    |
//! | anything else     | `Inline(Url)`        |
//!
//! `Bytes` serialize as a base64 data URL. String prefixes are only looked at
//! here, at the serde boundary; the rest of the crate matches on the enum.
//!
//! ## Blob Keys
//!
//! Keys are derived from the owning record, so no two records can collide:
//!
//! - Output slot: `img:<generation_id>:<index>`
//! - Input image: `img:<generation_id>:input:<input_id>`

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

const REF_PREFIX: &str = "ref:";
const HANDLE_PREFIX: &str = "blob:";
const DATA_PREFIX: &str = "data:";

/// Key of a binary payload in the blob store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobKey(String);

impl BlobKey {
    /// Key for output slot `index` of a generation.
    pub fn output(generation_id: &str, index: usize) -> Self {
        Self(format!("img:{}:{}", generation_id, index))
    }

    /// Key for an input (reference) image attached to a generation.
    pub fn input(generation_id: &str, input_id: &str) -> Self {
        Self(format!("img:{}:input:{}", generation_id, input_id))
    }

    /// Wraps a key read back from storage.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Raw, not-yet-durable image data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InlineImage {
    /// Session-scoped display handle. Only the resolver issues these, and
    /// only after the bytes were written under the key.
    Handle(BlobKey),
    Url(String),
    DataUrl(String),
    Bytes { mime: String, bytes: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ImageData {
    #[default]
    Empty,
    Reference(BlobKey),
    Inline(InlineImage),
}

impl ImageData {
    pub fn bytes(mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        ImageData::Inline(InlineImage::Bytes {
            mime: mime.into(),
            bytes,
        })
    }

    pub fn url(url: impl Into<String>) -> Self {
        ImageData::Inline(InlineImage::Url(url.into()))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, ImageData::Empty)
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, ImageData::Reference(_))
    }

    /// The blob key this field points at, for references and session handles.
    pub fn blob_key(&self) -> Option<&BlobKey> {
        match self {
            ImageData::Reference(key) | ImageData::Inline(InlineImage::Handle(key)) => Some(key),
            _ => None,
        }
    }

    fn to_wire(&self) -> String {
        match self {
            ImageData::Empty => String::new(),
            ImageData::Reference(key) => format!("{}{}", REF_PREFIX, key),
            ImageData::Inline(InlineImage::Handle(key)) => format!("{}{}", HANDLE_PREFIX, key),
            ImageData::Inline(InlineImage::Url(url)) => url.clone(),
            ImageData::Inline(InlineImage::DataUrl(data)) => data.clone(),
            ImageData::Inline(InlineImage::Bytes { mime, bytes }) => {
                format!("{}{};base64,{}", DATA_PREFIX, mime, STANDARD.encode(bytes))
            }
        }
    }

    fn from_wire(raw: String) -> Self {
        if raw.is_empty() {
            ImageData::Empty
        } else if let Some(key) = raw.strip_prefix(REF_PREFIX) {
            ImageData::Reference(BlobKey::from_raw(key))
        } else if let Some(key) = raw.strip_prefix(HANDLE_PREFIX) {
            ImageData::Inline(InlineImage::Handle(BlobKey::from_raw(key)))
        } else if raw.starts_with(DATA_PREFIX) {
            ImageData::Inline(InlineImage::DataUrl(raw))
        } else {
            ImageData::Inline(InlineImage::Url(raw))
        }
    }
}

impl Serialize for ImageData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_wire())
    }
}

impl<'de> Deserialize<'de> for ImageData {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Legacy documents stored `null` for slots that never filled.
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(ImageData::from_wire(raw.unwrap_or_default()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AspectRatio {
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "3:4")]
    Portrait,
    #[serde(rename = "4:3")]
    Landscape,
    #[serde(rename = "16:9")]
    Widescreen,
    #[serde(rename = "9:16")]
    Vertical,
}

impl AspectRatio {
    /// Nominal output size, used until the provider reports the real one.
    pub fn default_size(&self) -> Size {
        let (width, height) = match self {
            AspectRatio::Square => (1024, 1024),
            AspectRatio::Portrait => (768, 1024),
            AspectRatio::Landscape => (1024, 768),
            AspectRatio::Widescreen => (1344, 768),
            AspectRatio::Vertical => (768, 1344),
        };
        Size { width, height }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Auto,
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Png,
    Jpeg,
    Webp,
}

impl OutputFormat {
    pub fn mime(&self) -> &'static str {
        match self {
            OutputFormat::Png => "image/png",
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Webp => "image/webp",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    Gemini,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

/// How a batch should be produced. Fixed at submit time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationOptions {
    pub aspect: AspectRatio,
    pub quality: Quality,
    pub output_format: OutputFormat,
    pub provider: Provider,
    pub image_count: usize,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            aspect: AspectRatio::Square,
            quality: Quality::Auto,
            output_format: OutputFormat::Png,
            provider: Provider::OpenAi,
            image_count: 1,
        }
    }
}

/// A reference image supplied for edit-style generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputImage {
    pub id: String,
    pub name: String,
    #[serde(rename = "url")]
    pub data: ImageData,
    pub width: u32,
    pub height: u32,
}

impl InputImage {
    pub fn new(name: impl Into<String>, data: ImageData, width: u32, height: u32) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            data,
            width,
            height,
        }
    }
}

/// One user-initiated generation batch.
///
/// `images` is sized at creation and never grows. A slot goes from empty to
/// filled at most once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRecord {
    pub id: String,
    pub prompt: String,
    pub aspect: AspectRatio,
    pub quality: Quality,
    pub output_format: OutputFormat,
    pub provider: Provider,
    pub size: Size,
    pub created_at: DateTime<Utc>,
    pub images: Vec<ImageData>,
    #[serde(default)]
    pub input_images: Vec<InputImage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub text_parts: Vec<String>,
}

impl GenerationRecord {
    /// A fresh pending record with `options.image_count` empty slots.
    pub fn new_pending(
        prompt: impl Into<String>,
        options: &GenerationOptions,
        input_images: Vec<InputImage>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            prompt: prompt.into(),
            aspect: options.aspect,
            quality: options.quality,
            output_format: options.output_format,
            provider: options.provider,
            size: options.aspect.default_size(),
            created_at: Utc::now(),
            images: vec![ImageData::Empty; options.image_count],
            input_images,
            text_parts: Vec::new(),
        }
    }

    /// Options that reproduce this batch, asking for `image_count` images.
    pub fn options(&self, image_count: usize) -> GenerationOptions {
        GenerationOptions {
            aspect: self.aspect,
            quality: self.quality,
            output_format: self.output_format,
            provider: self.provider,
            image_count,
        }
    }

    pub fn empty_slots(&self) -> usize {
        self.images.iter().filter(|slot| slot.is_empty()).count()
    }

    pub fn filled_slots(&self) -> usize {
        self.images.len() - self.empty_slots()
    }

    /// A completed record with slots that never filled.
    pub fn is_interrupted(&self) -> bool {
        self.empty_slots() > 0
    }

    /// Fills empty slots in order with the non-empty `produced` images.
    /// Extra images are dropped; the slot count never changes.
    /// Returns how many slots were filled.
    pub fn fill_empty_slots(&mut self, produced: Vec<ImageData>) -> usize {
        let mut produced = produced.into_iter().filter(|image| !image.is_empty());
        let mut filled = 0;
        for slot in self.images.iter_mut().filter(|slot| slot.is_empty()) {
            match produced.next() {
                Some(image) => {
                    *slot = image;
                    filled += 1;
                }
                None => break,
            }
        }
        filled
    }

    /// Every blob key this record keeps alive, outputs and inputs.
    pub fn blob_keys(&self) -> impl Iterator<Item = &BlobKey> {
        self.images
            .iter()
            .chain(self.input_images.iter().map(|input| &input.data))
            .filter_map(ImageData::blob_key)
    }

    /// Every key this record may have data under: the keys its fields point
    /// at, plus the key derived from its id for each non-empty field.
    /// A record recovered under a fresh id still points at the keys of the
    /// id it was created with.
    pub fn owned_keys(&self) -> BTreeSet<BlobKey> {
        let derived_outputs = self
            .images
            .iter()
            .enumerate()
            .filter(|(_, slot)| !slot.is_empty())
            .map(|(index, _)| BlobKey::output(&self.id, index));
        let derived_inputs = self
            .input_images
            .iter()
            .filter(|input| !input.data.is_empty())
            .map(|input| BlobKey::input(&self.id, &input.id));
        self.blob_keys()
            .cloned()
            .chain(derived_outputs)
            .chain(derived_inputs)
            .collect()
    }
}

/// Favorite mark on one image of one generation. Presence means favorited.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FavoriteKey {
    pub generation_id: String,
    pub image_index: usize,
}

impl FavoriteKey {
    pub fn new(generation_id: impl Into<String>, image_index: usize) -> Self {
        Self {
            generation_id: generation_id.into(),
            image_index,
        }
    }
}

impl fmt::Display for FavoriteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.generation_id, self.image_index)
    }
}

impl FromStr for FavoriteKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, index) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("favorite key without index: {}", s))?;
        if id.is_empty() {
            return Err(format!("favorite key without generation id: {}", s));
        }
        let image_index = index
            .parse()
            .map_err(|_| format!("invalid image index in favorite key: {}", s))?;
        Ok(Self::new(id, image_index))
    }
}

impl Serialize for FavoriteKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FavoriteKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

pub type FavoriteSet = BTreeSet<FavoriteKey>;

#[cfg(test)]
mod tests {
    use super::*;

    fn record_with(images: Vec<ImageData>) -> GenerationRecord {
        let mut record = GenerationRecord::new_pending(
            "a lighthouse at dusk",
            &GenerationOptions {
                image_count: images.len(),
                ..Default::default()
            },
            Vec::new(),
        );
        record.images = images;
        record
    }

    #[test]
    fn blob_keys_are_derived_from_owner() {
        assert_eq!(BlobKey::output("gen-1", 3).as_str(), "img:gen-1:3");
        assert_eq!(
            BlobKey::input("gen-1", "att-9").as_str(),
            "img:gen-1:input:att-9"
        );
    }

    #[test]
    fn owned_keys_cover_pointed_at_and_derived_keys() {
        let mut record = record_with(vec![
            ImageData::Reference(BlobKey::output("original-id", 0)),
            ImageData::Empty,
        ]);
        record.input_images.push(InputImage {
            id: "att-1".to_string(),
            name: "cat.png".to_string(),
            data: ImageData::bytes("image/png", vec![1]),
            width: 1,
            height: 1,
        });

        let keys = record.owned_keys();

        assert!(keys.contains(&BlobKey::output("original-id", 0)));
        assert!(keys.contains(&BlobKey::output(&record.id, 0)));
        assert!(keys.contains(&BlobKey::input(&record.id, "att-1")));
        assert!(!keys.contains(&BlobKey::output(&record.id, 1)));
        assert_eq!(keys.len(), 3);
    }

    #[test]
    fn wire_form_distinguishes_the_three_states() {
        let json = r#"["", "ref:img:g:0", "blob:img:g:1", "data:image/png;base64,AAEC", "https://cdn.example/x.png"]"#;
        let parsed: Vec<ImageData> = serde_json::from_str(json).unwrap();

        assert_eq!(parsed[0], ImageData::Empty);
        assert_eq!(
            parsed[1],
            ImageData::Reference(BlobKey::from_raw("img:g:0"))
        );
        assert_eq!(
            parsed[2],
            ImageData::Inline(InlineImage::Handle(BlobKey::from_raw("img:g:1")))
        );
        assert!(matches!(
            parsed[3],
            ImageData::Inline(InlineImage::DataUrl(_))
        ));
        assert_eq!(parsed[4], ImageData::url("https://cdn.example/x.png"));
    }

    #[test]
    fn null_slot_reads_as_empty() {
        let parsed: Vec<ImageData> = serde_json::from_str("[null]").unwrap();
        assert_eq!(parsed, vec![ImageData::Empty]);
    }

    #[test]
    fn bytes_serialize_as_data_url() {
        let data = ImageData::bytes("image/png", vec![0, 1, 2]);
        let json = serde_json::to_string(&data).unwrap();
        assert_eq!(json, "\"data:image/png;base64,AAEC\"");
    }

    #[test]
    fn record_uses_camel_case_and_url_field_for_inputs() {
        let mut record = record_with(vec![ImageData::Empty]);
        record.input_images.push(InputImage {
            id: "att-1".to_string(),
            name: "cat.png".to_string(),
            data: ImageData::Reference(BlobKey::input(&record.id, "att-1")),
            width: 10,
            height: 20,
        });
        let value = serde_json::to_value(&record).unwrap();

        assert!(value.get("createdAt").is_some());
        assert!(value.get("outputFormat").is_some());
        assert_eq!(value["aspect"], "1:1");
        assert!(value["inputImages"][0]["url"]
            .as_str()
            .unwrap()
            .starts_with("ref:img:"));
        assert!(value.get("textParts").is_none());
    }

    #[test]
    fn fill_empty_slots_never_grows_the_record() {
        let mut record = record_with(vec![
            ImageData::Empty,
            ImageData::Reference(BlobKey::from_raw("img:x:1")),
            ImageData::Empty,
        ]);

        let filled = record.fill_empty_slots(vec![
            ImageData::url("https://a"),
            ImageData::Empty,
            ImageData::url("https://b"),
            ImageData::url("https://c"),
        ]);

        assert_eq!(filled, 2);
        assert_eq!(record.images.len(), 3);
        assert_eq!(record.images[0], ImageData::url("https://a"));
        assert_eq!(record.images[2], ImageData::url("https://b"));
        assert!(!record.is_interrupted());
    }

    #[test]
    fn partial_fill_leaves_record_interrupted() {
        let mut record = record_with(vec![ImageData::Empty; 4]);
        record.fill_empty_slots(vec![ImageData::url("https://a")]);

        assert_eq!(record.filled_slots(), 1);
        assert_eq!(record.empty_slots(), 3);
        assert!(record.is_interrupted());
    }

    #[test]
    fn favorite_key_round_trips_through_display() {
        let key: FavoriteKey = "gen-1:2".parse().unwrap();
        assert_eq!(key, FavoriteKey::new("gen-1", 2));
        assert_eq!(key.to_string(), "gen-1:2");
    }

    #[test]
    fn favorite_key_splits_at_last_colon() {
        let key: FavoriteKey = "a:b:7".parse().unwrap();
        assert_eq!(key.generation_id, "a:b");
        assert_eq!(key.image_index, 7);
    }

    #[test]
    fn favorite_key_rejects_garbage() {
        assert!("no-index".parse::<FavoriteKey>().is_err());
        assert!("gen:abc".parse::<FavoriteKey>().is_err());
        assert!(":3".parse::<FavoriteKey>().is_err());
    }
}
