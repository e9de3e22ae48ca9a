//! Supply-chain news search (NewsAPI `everything` endpoint).

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{UpstreamError, ValidationError};

use super::http::{json_f64, json_str};
use super::simulate::SimRng;
use super::LiveContext;

const PAGE_SIZE: u32 = 50;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    Relevancy,
    Popularity,
    #[default]
    PublishedAt,
}

impl SortBy {
    fn as_api(&self) -> &'static str {
        match self {
            SortBy::Relevancy => "relevancy",
            SortBy::Popularity => "popularity",
            SortBy::PublishedAt => "publishedAt",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsQuery {
    pub keywords: Vec<String>,
    #[serde(default = "default_language")]
    pub language: String,
    /// `YYYY-MM-DD`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_date: Option<String>,
    #[serde(default)]
    pub sort_by: SortBy,
    #[serde(default)]
    pub regions: Vec<String>,
}

fn default_language() -> String {
    "en".to_string()
}

impl NewsQuery {
    pub fn new(keywords: Vec<String>) -> Self {
        Self {
            keywords,
            language: default_language(),
            from_date: None,
            sort_by: SortBy::default(),
            regions: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.keywords.iter().any(|k| !k.trim().is_empty()) {
            return Err(ValidationError::new("keywords", "at least one keyword is required"));
        }
        if self.language.len() != 2 || !self.language.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ValidationError::new("language", "must be a two-letter code"));
        }
        if let Some(from) = &self.from_date {
            NaiveDate::parse_from_str(from, "%Y-%m-%d")
                .map_err(|_| ValidationError::new("from_date", "expected YYYY-MM-DD"))?;
        }
        Ok(())
    }

    fn search_expression(&self) -> String {
        self.keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .map(|k| if k.contains(' ') { format!("\"{}\"", k) } else { k.to_string() })
            .collect::<Vec<_>>()
            .join(" OR ")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsArticle {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<String>,
}

impl NewsArticle {
    /// Title and description, the text keyword rules run against.
    pub fn text(&self) -> String {
        format!("{} {}", self.title, self.description)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsDigest {
    pub articles: Vec<NewsArticle>,
    pub total_results: u64,
    pub confidence: f64,
    pub observed_at: DateTime<Utc>,
}

pub async fn fetch_live(ctx: &LiveContext, query: &NewsQuery) -> Result<NewsDigest, UpstreamError> {
    let mut params = vec![
        ("q", query.search_expression()),
        ("language", query.language.clone()),
        ("sortBy", query.sort_by.as_api().to_string()),
        ("pageSize", PAGE_SIZE.to_string()),
        ("apiKey", ctx.api_key.clone()),
    ];
    if let Some(from) = &query.from_date {
        params.push(("from", from.clone()));
    }

    let body = ctx.http.get_json(&ctx.base_url, &params).await?;
    if json_str(&body, "status").as_deref() == Some("error") {
        return Err(UpstreamError::Malformed(
            json_str(&body, "message").unwrap_or_else(|| "NewsAPI returned an error".to_string()),
        ));
    }
    let articles: Vec<NewsArticle> = body
        .get("articles")
        .and_then(|a| a.as_array())
        .ok_or_else(|| UpstreamError::Malformed("missing articles".to_string()))?
        .iter()
        .filter_map(parse_article)
        .collect();
    let total_results = json_f64(&body, "totalResults")
        .map(|t| t as u64)
        .unwrap_or(articles.len() as u64);

    Ok(NewsDigest {
        articles,
        total_results,
        confidence: ctx.confidence,
        observed_at: Utc::now(),
    })
}

fn parse_article(raw: &serde_json::Value) -> Option<NewsArticle> {
    Some(NewsArticle {
        title: json_str(raw, "title")?,
        description: json_str(raw, "description").unwrap_or_default(),
        source: raw
            .get("source")
            .and_then(|s| json_str(s, "name"))
            .unwrap_or_else(|| "unknown".to_string()),
        url: json_str(raw, "url"),
        published_at: json_str(raw, "publishedAt"),
    })
}

// ---------------------------------------------------------------------------
// Simulation
// ---------------------------------------------------------------------------

/// Headline templates. `{place}` and `{topic}` are filled from the request.
const HEADLINES: &[(&str, &str)] = &[
    (
        "Port workers strike enters third day in {place}",
        "Longshoremen continue strike over wage disputes, causing a container backlog and delay for {topic} shipments",
    ),
    (
        "Congestion delays container traffic at {place}",
        "Berth shortage leaves vessels waiting offshore as {topic} importers report disruption",
    ),
    (
        "Ransomware attack disrupts logistics systems in {place}",
        "A cyber attack on terminal software halted gate operations; {topic} cargo held",
    ),
    (
        "New sanctions and tariffs announced on {topic} components",
        "Export controls tighten trade policy for suppliers shipping through {place}",
    ),
    (
        "Shipping schedules recover as {place} backlog is resolved",
        "Carriers report improvement after an agreement ended the dispute; {topic} flows normalising",
    ),
    (
        "{topic} shortage deepens supply crisis in {place}",
        "Manufacturers warn of disruption and delay as inventories run low",
    ),
    (
        "Terminal operations steady in {place}",
        "Volumes of {topic} freight remain in line with seasonal averages",
    ),
];

const FALLBACK_PLACES: &[&str] = &["Asia", "Europe", "North America", "Middle East"];
const OUTLETS: &[&str] = &["Shipping News", "Freight Weekly", "Trade Monitor", "Logistics Daily"];

pub fn simulate(query: &NewsQuery, rng: &mut SimRng) -> NewsDigest {
    let topics: Vec<&str> = query
        .keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .collect();
    let places: Vec<&str> = if query.regions.is_empty() {
        FALLBACK_PLACES.to_vec()
    } else {
        query.regions.iter().map(String::as_str).collect()
    };

    let count = rng.int(2, 6);
    let now = Utc::now();
    let articles: Vec<NewsArticle> = (0..count)
        .map(|i| {
            let (title, description) = rng.pick(HEADLINES).copied().unwrap_or(HEADLINES[0]);
            let place = rng.pick(&places).copied().unwrap_or("Asia");
            let topic = rng.pick(&topics).copied().unwrap_or("supply chain");
            let fill = |template: &str| template.replace("{place}", place).replace("{topic}", topic);
            NewsArticle {
                title: fill(title),
                description: fill(description),
                source: rng.pick(OUTLETS).copied().unwrap_or("Shipping News").to_string(),
                url: None,
                published_at: Some((now - Duration::hours(i * 3)).to_rfc3339()),
            }
        })
        .collect();

    NewsDigest {
        total_results: articles.len() as u64,
        articles,
        confidence: rng.confidence(),
        observed_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationConfig;

    #[test]
    fn test_validation() {
        assert!(NewsQuery::new(vec!["port strike".to_string()]).validate().is_ok());
        assert_eq!(
            NewsQuery::new(vec!["  ".to_string()]).validate().unwrap_err().field,
            "keywords"
        );
        let mut q = NewsQuery::new(vec!["strike".to_string()]);
        q.language = "eng".to_string();
        assert_eq!(q.validate().unwrap_err().field, "language");
        q.language = "de".to_string();
        q.from_date = Some("yesterday".to_string());
        assert_eq!(q.validate().unwrap_err().field, "from_date");
        q.from_date = Some("2024-01-10".to_string());
        assert!(q.validate().is_ok());
    }

    #[test]
    fn test_search_expression_quotes_phrases() {
        let q = NewsQuery::new(vec!["port strike".to_string(), "tariff".to_string(), " ".to_string()]);
        assert_eq!(q.search_expression(), "\"port strike\" OR tariff");
    }

    #[test]
    fn test_parse_article() {
        let raw = serde_json::json!({
            "title": "Strike at port", "description": null,
            "source": { "id": null, "name": "Reuters" }, "publishedAt": "2024-01-10T09:00:00Z"
        });
        let article = parse_article(&raw).expect("article");
        assert_eq!(article.source, "Reuters");
        assert_eq!(article.description, "");
        assert!(parse_article(&serde_json::json!({ "description": "untitled" })).is_none());
    }

    #[test]
    fn test_simulation_uses_request_terms() {
        let sim = SimulationConfig::default();
        let mut q = NewsQuery::new(vec!["semiconductor".to_string()]);
        q.regions = vec!["Rotterdam".to_string()];
        let digest = simulate(&q, &mut SimRng::from_seed(11, &sim));
        assert!((2..=6).contains(&digest.articles.len()));
        assert!(digest.articles.iter().all(|a| !a.text().contains('{')));
        assert!(digest.articles.iter().all(|a| !a.text().contains("Asia")));
    }
}
