//! Classification of JWST products from their file names.
//!
//! JWST pipeline products encode their calibration stage in the last
//! `_`-separated token of the file stem (`_uncal`, `_rate`, `_cal`,
//! `_i2d`, ...) and their provenance in the leading tokens. Everything
//! the importer knows about a file before opening it comes from here.

use std::sync::LazyLock;

use jwst_catalog_models::{DataType, ProcessingLevel};
use regex::Regex;

/// Exposure-level products: `jw<ppppp><ooo><vvv>_...`.
static EXPOSURE_BASE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^jw(\d{5})(\d{3})\d{3}_").expect("valid regex"));

/// Combined products: `jw<ppppp>-o<ooo>_...` or association candidates
/// `jw<ppppp>-c<nnnn>_...`.
static COMBINED_BASE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(jw\d{5}-[a-z]\d{3,4})_").expect("valid regex"));

/// `jw<program+obs+visit>_<group/parallel/activity>_<exposure>[-segNNN]_<detector>_`.
static EXPOSURE_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(jw\d{11}_\d{5}_\d{5})(?:-seg\d+)?_([a-z0-9]+)_").expect("valid regex")
});

/// What a file name says about its contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileClassification {
    pub data_type: DataType,
    pub processing_level: ProcessingLevel,
    pub is_viewable: bool,
    pub observation_base_id: Option<String>,
    pub exposure_id: Option<String>,
    /// Lowercased extension without the dot.
    pub file_format: String,
}

/// Suffix table: product suffix → (level, data type, viewable).
///
/// Association, catalog, pool, and 1-D spectrum products are never
/// viewable.
const SUFFIXES: &[(&str, ProcessingLevel, DataType, bool)] = &[
    ("uncal", ProcessingLevel::L1, DataType::Raw, true),
    ("rate", ProcessingLevel::L2a, DataType::Image, true),
    ("rateints", ProcessingLevel::L2a, DataType::Image, true),
    ("cal", ProcessingLevel::L2b, DataType::Image, true),
    ("calints", ProcessingLevel::L2b, DataType::Image, true),
    ("crf", ProcessingLevel::L2b, DataType::Image, true),
    ("s2d", ProcessingLevel::L2b, DataType::Spectral, true),
    ("x1d", ProcessingLevel::L2b, DataType::Spectral, false),
    ("x1dints", ProcessingLevel::L2b, DataType::Spectral, false),
    ("i2d", ProcessingLevel::L3, DataType::Image, true),
    ("segm", ProcessingLevel::L3, DataType::Image, true),
    ("s3d", ProcessingLevel::L3, DataType::Spectral, true),
    ("c1d", ProcessingLevel::L3, DataType::Spectral, false),
    ("cat", ProcessingLevel::L3, DataType::Catalog, false),
    ("asn", ProcessingLevel::Unknown, DataType::Association, false),
    ("pool", ProcessingLevel::Unknown, DataType::Association, false),
];

/// Extensions of files the importer catalogs.
pub const KNOWN_FORMATS: &[&str] = &["fits", "fit", "json", "ecsv", "csv", "asdf"];

/// Classifies a file purely from its name.
///
/// Unrecognized suffixes yield [`ProcessingLevel::Unknown`] and
/// [`DataType::Other`]; unmatched id patterns yield `None` for that id.
#[must_use]
pub fn classify(file_name: &str) -> FileClassification {
    let (stem, file_format) = file_name
        .rsplit_once('.')
        .map_or((file_name, String::new()), |(stem, ext)| {
            (stem, ext.to_ascii_lowercase())
        });
    let suffix = stem
        .rsplit_once('_')
        .map_or(stem, |(_, suffix)| suffix)
        .to_ascii_lowercase();

    let (processing_level, data_type, suffix_viewable) = SUFFIXES
        .iter()
        .find(|(s, ..)| *s == suffix)
        .map_or(
            (ProcessingLevel::Unknown, DataType::Other, true),
            |(_, level, data_type, viewable)| (*level, *data_type, *viewable),
        );

    let is_viewable = suffix_viewable && matches!(file_format.as_str(), "fits" | "fit");

    FileClassification {
        data_type,
        processing_level,
        is_viewable,
        observation_base_id: observation_base_id(file_name),
        exposure_id: exposure_id(file_name),
        file_format,
    }
}

/// Extracts the observation base id (`jw<ppppp>-o<ooo>` form).
#[must_use]
pub fn observation_base_id(file_name: &str) -> Option<String> {
    if let Some(caps) = EXPOSURE_BASE_RE.captures(file_name) {
        return Some(format!("jw{}-o{}", &caps[1], &caps[2]));
    }
    COMBINED_BASE_RE
        .captures(file_name)
        .map(|caps| caps[1].to_ascii_lowercase())
}

/// Extracts the exposure id, which includes the detector.
#[must_use]
pub fn exposure_id(file_name: &str) -> Option<String> {
    EXPOSURE_ID_RE
        .captures(file_name)
        .map(|caps| format!("{}_{}", &caps[1], &caps[2]).to_ascii_lowercase())
}

/// Whether a file with this name should be cataloged at all.
#[must_use]
pub fn is_known_format(file_name: &str) -> bool {
    file_name
        .rsplit_once('.')
        .is_some_and(|(_, ext)| KNOWN_FORMATS.contains(&ext.to_ascii_lowercase().as_str()))
}
