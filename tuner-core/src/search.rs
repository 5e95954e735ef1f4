//! # Melody Search
//!
//! Contract of the melody search service and an in-memory implementation.
//! The wire types mirror the JSON the search backend returns, so a remote
//! client can deserialize straight into them.

use crate::{
    acquisition::TraceEvent,
    contour::{ContourError, ParsonsCode},
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

/// Maximum number of results for a typed Parsons query.
pub const PARSONS_RESULT_LIMIT: usize = 20;
/// Maximum number of results for a recorded clip.
pub const AUDIO_RESULT_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Composer {
    pub name: String,
}

/// One entry of a result list: the matched catalog document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    pub composer: Composer,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub melodic_contour: Option<ParsonsCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lilypond_path: Option<String>,
}

/// A catalog document: the result fields plus the indexed contour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Composition {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    pub composer: Composer,
    pub melodic_contour: ParsonsCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lilypond_path: Option<String>,
}

impl Composition {
    pub fn to_result(&self) -> SearchResult {
        SearchResult {
            id: self.id.clone(),
            title: self.title.clone(),
            composer: self.composer.clone(),
            melodic_contour: Some(self.melodic_contour.clone()),
            lilypond_path: self.lilypond_path.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsonsSearchResponse {
    pub query: String,
    pub results: Vec<SearchResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSearchResponse {
    /// Contour derived from the clip, `None` when no melody could be extracted.
    pub generated_contour: Option<ParsonsCode>,
    pub results: Vec<SearchResult>,
}

/// A recorded clip, reduced to the pitch engine's frame-wise estimates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioClip {
    pub pitches: Vec<Option<f32>>,
}

impl AudioClip {
    pub fn from_trace(trace: &[TraceEvent]) -> Self {
        Self {
            pitches: trace.iter().map(|event| event.pitch).collect(),
        }
    }

    /// Contour of the melody in the clip, if it has at least two distinct notes.
    pub fn contour(&self) -> Option<ParsonsCode> {
        let track: Vec<f32> = self.pitches.iter().map(|p| p.unwrap_or(0.0)).collect();
        ParsonsCode::from_pitch_track(&track)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("invalid Parsons query: {0}")]
    InvalidQuery(#[from] ContourError),
    #[error("search service unavailable: {0}")]
    Unavailable(String),
}

/// The two request shapes of the melody search.
pub trait SearchService {
    fn search_parsons(&self, query: &str) -> Result<ParsonsSearchResponse, SearchError>;

    fn search_audio(&self, clip: &AudioClip) -> Result<AudioSearchResponse, SearchError>;
}

/// In-memory catalog of compositions searchable by contour.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    compositions: Vec<Composition>,
}

impl Catalog {
    pub fn new(compositions: Vec<Composition>) -> Self {
        Self { compositions }
    }

    /// Loads a JSON array of compositions.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut file =
            File::open(path).with_context(|| format!("opening catalog {}", path.display()))?;
        let mut data = String::new();
        file.read_to_string(&mut data)?;
        let compositions: Vec<Composition> = serde_json::from_str(&data)
            .with_context(|| format!("parsing catalog {}", path.display()))?;
        log::info!("[SEARCH] Loaded {} compositions", compositions.len());
        Ok(Self::new(compositions))
    }

    /// Writes the catalog as a pretty-printed JSON array.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(&self.compositions)?;
        let mut file =
            File::create(path).with_context(|| format!("creating catalog {}", path.display()))?;
        file.write_all(json.as_bytes())?;
        log::info!("[SEARCH] Saved {} compositions to {}", self.len(), path.display());
        Ok(())
    }

    pub fn compositions(&self) -> &[Composition] {
        &self.compositions
    }

    pub fn len(&self) -> usize {
        self.compositions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compositions.is_empty()
    }

    /// Compositions whose contour contains `query`. Contours that begin with
    /// the query rank first; otherwise catalog order is kept.
    pub fn matching(&self, query: &ParsonsCode, limit: usize) -> Vec<SearchResult> {
        let mut hits: Vec<&Composition> = self
            .compositions
            .iter()
            .filter(|c| c.melodic_contour.contains(query))
            .collect();
        hits.sort_by_key(|c| !c.melodic_contour.begins_with(query));
        hits.into_iter().take(limit).map(Composition::to_result).collect()
    }
}

impl SearchService for Catalog {
    fn search_parsons(&self, query: &str) -> Result<ParsonsSearchResponse, SearchError> {
        let code = ParsonsCode::parse(query)?;
        log::debug!("[SEARCH] Parsons query {}", code);
        Ok(ParsonsSearchResponse {
            results: self.matching(&code, PARSONS_RESULT_LIMIT),
            query: code.into(),
        })
    }

    fn search_audio(&self, clip: &AudioClip) -> Result<AudioSearchResponse, SearchError> {
        let Some(contour) = clip.contour() else {
            log::info!("[SEARCH] No melody found in clip of {} frames", clip.pitches.len());
            return Ok(AudioSearchResponse {
                generated_contour: None,
                results: vec![],
            });
        };
        log::debug!("[SEARCH] Generated contour {} from clip", contour);
        Ok(AudioSearchResponse {
            results: self.matching(&contour, AUDIO_RESULT_LIMIT),
            generated_contour: Some(contour),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn composition(id: &str, title: &str, composer: &str, contour: &str) -> Composition {
        Composition {
            id: id.into(),
            title: title.into(),
            composer: Composer { name: composer.into() },
            melodic_contour: ParsonsCode::parse(contour).unwrap(),
            lilypond_path: None,
        }
    }

    fn catalog() -> Catalog {
        Catalog::new(vec![
            composition("1", "Ode to Joy", "Ludwig van Beethoven", "*RUURDDDDRUURDR"),
            composition("2", "Twinkle Variations", "Wolfgang Amadeus Mozart", "*RURURDDRDRDRD"),
            composition("3", "Minuet in G", "Johann Sebastian Bach", "*UUUUDDRUUUUD"),
        ])
    }

    #[test]
    fn parsons_search_is_case_insensitive() {
        let response = catalog().search_parsons("ruru").unwrap();
        assert_eq!(response.query, "RURU");
        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].composer.name, "Wolfgang Amadeus Mozart");
    }

    #[test]
    fn prefix_matches_rank_first() {
        let response = catalog().search_parsons("UU").unwrap();
        let ids: Vec<_> = response.results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["3", "1"]);
    }

    #[test]
    fn parsons_results_are_capped() {
        let many = (0..30)
            .map(|i| composition(&i.to_string(), "Etude", "Carl Czerny", "*UD"))
            .collect();
        let response = Catalog::new(many).search_parsons("*U").unwrap();
        assert_eq!(response.results.len(), PARSONS_RESULT_LIMIT);
    }

    #[test]
    fn invalid_query_is_rejected() {
        assert!(matches!(
            catalog().search_parsons("*UP"),
            Err(SearchError::InvalidQuery(ContourError::InvalidSymbol { .. }))
        ));
    }

    #[test]
    fn audio_search_generates_contour() {
        // E F G with a wobbling G.
        let clip = AudioClip {
            pitches: vec![Some(329.63), None, Some(349.23), Some(392.0), Some(392.5)],
        };
        let response = catalog().search_audio(&clip).unwrap();
        assert_eq!(response.generated_contour.unwrap().as_str(), "*UU");
        let ids: Vec<_> = response.results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["3"]);
    }

    #[test]
    fn start_marker_only_matches_melody_openings() {
        // "UU" occurs inside Beethoven's contour, "*UU" only at Bach's start.
        let steps = catalog().search_parsons("UU").unwrap();
        assert!(steps.results.iter().any(|r| r.id == "1"));

        let opening = catalog().search_parsons("*UU").unwrap();
        let ids: Vec<_> = opening.results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["3"]);
    }

    #[test]
    fn silent_clip_returns_nothing() {
        let clip = AudioClip { pitches: vec![None, Some(0.0), Some(440.0)] };
        let response = catalog().search_audio(&clip).unwrap();
        assert!(response.generated_contour.is_none());
        assert!(response.results.is_empty());
    }

    #[test]
    fn wire_format_uses_backend_field_names() {
        let json = r#"[{
            "_id": "64f0c0ffee",
            "title": "Gymnopedie No. 1",
            "composer": { "name": "Erik Satie" },
            "melodic_contour": "*UDDDU",
            "lilypond_path": "SatieE/gymnopedie/gymnopedie.ly"
        }]"#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(&path, json).unwrap();

        let catalog = Catalog::load(&path).unwrap();
        assert_eq!(catalog.len(), 1);
        let response = catalog.search_parsons("*U").unwrap();
        let value = serde_json::to_value(&response.results[0]).unwrap();
        assert_eq!(value["_id"], "64f0c0ffee");
        assert_eq!(value["composer"]["name"], "Erik Satie");
        assert_eq!(value["melodic_contour"], "*UDDDU");
        assert_eq!(value["lilypond_path"], "SatieE/gymnopedie/gymnopedie.ly");

        let saved = dir.path().join("saved.json");
        catalog.save(&saved).unwrap();
        assert_eq!(Catalog::load(&saved).unwrap().compositions(), catalog.compositions());
    }

    #[test]
    fn result_without_document_fields_still_parses() {
        let result: SearchResult =
            serde_json::from_str(r#"{"_id": "7", "title": "Nocturne", "composer": {"name": "Frédéric Chopin"}}"#)
                .unwrap();
        assert!(result.melodic_contour.is_none());
        assert!(result.lilypond_path.is_none());
    }

    #[test]
    fn clip_from_trace() {
        let trace = vec![
            TraceEvent { at_ms: 0, pitch: Some(261.63) },
            TraceEvent { at_ms: 100, pitch: Some(293.66) },
        ];
        let clip = AudioClip::from_trace(&trace);
        assert_eq!(clip.contour().unwrap().as_str(), "*U");
    }
}
