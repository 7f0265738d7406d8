//! Pattern analyzer
//!
//! Frequency statistics over a library's mirrored items, turned into filter
//! suggestions a user can accept as rule criteria.

use crate::core::clock::Clock;
use crate::core::content_type::content_type_of;
use crate::core::error::{CuratorError, Result};
use crate::core::rule_engine::{CompiledCriterion, Criterion, ItemProjection, Operator, RuleField};
use crate::db::models::{CatalogItem, PatternSuggestion};
use crate::db::repository::{
    CatalogItemRepository, LibraryRepository, PatternSuggestionRepository, Repository,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Percentage at or above which a pattern is pre-selected
const PRESELECT_PERCENT: u32 = 80;
/// Minimum share of items a genre or tag value must appear in
const ARRAY_VALUE_PERCENT: usize = 15;
/// Minimum share for collection values
const COLLECTION_VALUE_PERCENT: usize = 20;
const CONFIDENCE: u32 = 100;

/// A suggested filter derived from the corpus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedPattern {
    pub field: String,
    pub operator: Operator,
    pub values: Vec<String>,
    pub match_percentage: u32,
    pub pre_selected: bool,
    pub confidence: u32,
}

impl DetectedPattern {
    fn new(field: RuleField, operator: Operator, values: Vec<String>, match_percentage: u32) -> Self {
        Self {
            field: field.as_str().to_string(),
            operator,
            values,
            match_percentage,
            pre_selected: match_percentage >= PRESELECT_PERCENT,
            confidence: CONFIDENCE,
        }
    }

    /// The rule criterion this pattern stands for
    pub fn to_criterion(&self) -> Criterion {
        let value = match (self.operator, self.values.as_slice()) {
            (Operator::Equals, [single]) => json!(single),
            _ => json!(self.values),
        };
        Criterion::new(self.field.clone(), self.operator, value)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeOptions {
    /// Only analyze items with this derived content type
    #[serde(default)]
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternAnalysis {
    pub library_id: String,
    pub items_analyzed: usize,
    pub patterns: Vec<DetectedPattern>,
}

/// round(100 * count / total), half up
fn match_percentage(count: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    ((200 * count + total) / (2 * total)) as u32
}

/// ceil(total * percent / 100)
fn value_threshold(total: usize, percent: usize) -> usize {
    (total * percent + 99) / 100
}

/// Distinct values by descending frequency; ties keep first-seen order
fn ranked<'a>(values: impl Iterator<Item = &'a str>) -> Vec<(String, usize)> {
    let mut order: Vec<(String, usize)> = Vec::new();
    let mut index: HashMap<&'a str, usize> = HashMap::new();
    for v in values {
        match index.get(v) {
            Some(&i) => order[i].1 += 1,
            None => {
                index.insert(v, order.len());
                order.push((v.to_string(), 1));
            }
        }
    }
    order.sort_by(|a, b| b.1.cmp(&a.1));
    order
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.trim().is_empty())
}

fn scalar_pattern(
    items: &[CatalogItem],
    field: RuleField,
    get: impl Fn(&CatalogItem) -> Option<&str>,
) -> Option<DetectedPattern> {
    let present: Vec<&str> = items.iter().filter_map(|i| get(i)).collect();
    if present.is_empty() {
        return None;
    }

    let values: Vec<String> = ranked(present.iter().copied())
        .into_iter()
        .map(|(v, _)| v)
        .collect();
    let operator = if values.len() == 1 {
        Operator::Equals
    } else {
        Operator::IsOneOf
    };
    Some(DetectedPattern::new(
        field,
        operator,
        values,
        match_percentage(present.len(), items.len()),
    ))
}

fn array_pattern(
    items: &[CatalogItem],
    field: RuleField,
    operator: Operator,
    threshold_percent: usize,
    get: impl Fn(&CatalogItem) -> &[String],
) -> Option<DetectedPattern> {
    let with_values = items.iter().filter(|i| !get(i).is_empty()).count();
    if with_values == 0 {
        return None;
    }

    let threshold = value_threshold(items.len(), threshold_percent);
    let values: Vec<String> = ranked(items.iter().flat_map(|i| get(i).iter().map(String::as_str)))
        .into_iter()
        .filter(|(_, count)| *count >= threshold)
        .map(|(v, _)| v)
        .collect();
    if values.is_empty() {
        debug!(field = field.as_str(), threshold, "No value reached the threshold");
        return None;
    }

    Some(DetectedPattern::new(
        field,
        operator,
        values,
        match_percentage(with_values, items.len()),
    ))
}

/// Compute patterns for a corpus, highest match percentage first
pub fn detect_patterns(items: &[CatalogItem]) -> Vec<DetectedPattern> {
    if items.is_empty() {
        return Vec::new();
    }

    let mut patterns: Vec<DetectedPattern> = [
        scalar_pattern(items, RuleField::ContentRating, |i| non_empty(&i.content_rating)),
        array_pattern(items, RuleField::Genres, Operator::IsOneOf, ARRAY_VALUE_PERCENT, |i| {
            i.genres.as_slice()
        }),
        array_pattern(
            items,
            RuleField::Collections,
            Operator::Contains,
            COLLECTION_VALUE_PERCENT,
            |i| i.collections.as_slice(),
        ),
        array_pattern(items, RuleField::Tags, Operator::IsOneOf, ARRAY_VALUE_PERCENT, |i| {
            i.tags.as_slice()
        }),
        scalar_pattern(items, RuleField::Studio, |i| non_empty(&i.studio)),
    ]
    .into_iter()
    .flatten()
    .collect();

    patterns.sort_by(|a, b| b.match_percentage.cmp(&a.match_percentage));
    patterns
}

/// Whether an item satisfies a pattern, with rule-engine semantics
pub fn item_matches_pattern(item: &CatalogItem, pattern: &DetectedPattern) -> bool {
    match CompiledCriterion::compile(&pattern.to_criterion()) {
        Ok(compiled) => compiled.matches(&ItemProjection::from_item(item)),
        Err(_) => false,
    }
}

pub struct PatternAnalyzer {
    libraries: Arc<LibraryRepository>,
    items: Arc<CatalogItemRepository>,
    suggestions: Arc<PatternSuggestionRepository>,
    clock: Arc<dyn Clock>,
}

impl PatternAnalyzer {
    pub fn new(
        libraries: Arc<LibraryRepository>,
        items: Arc<CatalogItemRepository>,
        suggestions: Arc<PatternSuggestionRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            libraries,
            items,
            suggestions,
            clock,
        }
    }

    /// Analyze a library and overwrite its stored suggestion
    pub async fn analyze_library(
        &self,
        library_id: &str,
        options: AnalyzeOptions,
    ) -> Result<PatternAnalysis> {
        if self.libraries.find_by_id(library_id).await?.is_none() {
            return Err(CuratorError::NotFound(format!(
                "Library {} not found",
                library_id
            )));
        }

        let mut items = self.items.find_by_library(library_id).await?;
        if let Some(wanted) = options.content_type.as_deref() {
            items.retain(|i| content_type_of(&i.metadata) == Some(wanted));
        }

        let patterns = detect_patterns(&items);
        let suggestion = PatternSuggestion {
            library_id: library_id.to_string(),
            detected_patterns: patterns.clone(),
            pending_count: patterns.len() as i64,
            last_analyzed: self.clock.now(),
            dismissed: false,
        };
        self.suggestions.upsert(&suggestion).await?;

        info!(
            library_id = %library_id,
            items = items.len(),
            patterns = patterns.len(),
            content_type = ?options.content_type,
            "Pattern analysis finished"
        );

        Ok(PatternAnalysis {
            library_id: library_id.to_string(),
            items_analyzed: items.len(),
            patterns,
        })
    }

    pub async fn get_suggestions(&self, library_id: &str) -> Result<PatternSuggestion> {
        self.suggestions
            .find_by_library(library_id)
            .await?
            .ok_or_else(|| {
                CuratorError::NotFound(format!("No pattern suggestions for library {}", library_id))
            })
    }

    pub async fn dismiss(&self, library_id: &str) -> Result<()> {
        if !self.suggestions.dismiss(library_id).await? {
            return Err(CuratorError::NotFound(format!(
                "No pattern suggestions for library {}",
                library_id
            )));
        }
        Ok(())
    }
}

/// Summary for scheduler results
pub fn analysis_summary(analysis: &PatternAnalysis) -> Value {
    json!({
        "libraryId": analysis.library_id,
        "itemsAnalyzed": analysis.items_analyzed,
        "patterns": analysis.patterns.len(),
    })
}
