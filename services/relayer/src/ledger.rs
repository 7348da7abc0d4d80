//! Badge-award ledger client (subgraph GraphQL)

use std::time::Duration;

use async_trait::async_trait;
use badges::{RawBadgeAward, Window};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::retry::{retry_transient, RetryPolicy, Transient};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger request failed: {0}")]
    Transport(String),

    #[error("ledger returned HTTP {status}")]
    Http { status: u16 },

    #[error("ledger request timed out after {0:?}")]
    Timeout(Duration),

    #[error("ledger query rejected: {0}")]
    Query(String),

    #[error("unexpected ledger response: {0}")]
    Decode(String),
}

impl Transient for LedgerError {
    fn is_transient(&self) -> bool {
        match self {
            LedgerError::Transport(_) | LedgerError::Timeout(_) => true,
            LedgerError::Http { status } => *status >= 500 || *status == 429,
            LedgerError::Query(_) | LedgerError::Decode(_) => false,
        }
    }

    fn timed_out(after: Duration) -> Self {
        LedgerError::Timeout(after)
    }
}

/// Ordered source of badge awards
#[async_trait]
pub trait LedgerSource: Send + Sync {
    /// Records `[window.starting_index, window.end())` in ascending global
    /// badge order. May return fewer when the ledger ends inside the window.
    async fn fetch_window(&self, window: Window) -> Result<Vec<RawBadgeAward>, LedgerError>;
}

const EARNED_BADGES_QUERY: &str = r#"
query EarnedBadges($first: Int!, $skip: Int!) {
  earnedBadgeCounts(first: $first, skip: $skip, orderBy: globalBadgeNumber, orderDirection: asc) {
    globalBadgeNumber
    earnedBadge {
      badgeWinner { id }
      definition { badgeDefinitionNumber }
    }
  }
}
"#;

pub struct SubgraphLedger {
    client: reqwest::Client,
    url: String,
    page_size: u64,
    policy: RetryPolicy,
}

impl SubgraphLedger {
    pub fn new(url: impl Into<String>, page_size: u64, policy: RetryPolicy) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            page_size: page_size.max(1),
            policy,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn fetch_page(&self, first: u64, skip: u64) -> Result<Vec<RawBadgeAward>, LedgerError> {
        let body = serde_json::json!({
            "query": EARNED_BADGES_QUERY,
            "variables": { "first": first, "skip": skip },
        });

        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| LedgerError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(LedgerError::Http { status: status.as_u16() });
        }

        let parsed: GraphResponse = resp
            .json()
            .await
            .map_err(|e| LedgerError::Decode(e.to_string()))?;

        if !parsed.errors.is_empty() {
            let msgs: Vec<String> = parsed.errors.into_iter().map(|e| e.message).collect();
            return Err(LedgerError::Query(msgs.join("; ")));
        }

        let data = parsed
            .data
            .ok_or_else(|| LedgerError::Decode("response has neither data nor errors".into()))?;

        data.earned_badge_counts
            .into_iter()
            .map(EarnedBadgeCount::into_raw)
            .collect()
    }
}

#[async_trait]
impl LedgerSource for SubgraphLedger {
    async fn fetch_window(&self, window: Window) -> Result<Vec<RawBadgeAward>, LedgerError> {
        let end = window.end();
        let mut skip = window.starting_index;
        let mut out = Vec::with_capacity(window.tree_size.min(self.page_size) as usize);

        while skip < end {
            let first = (end - skip).min(self.page_size);
            let page = retry_transient(self.policy, "ledger page", || self.fetch_page(first, skip)).await?;
            let got = page.len() as u64;
            debug!(skip, first, got, "ledger page");

            if got > first {
                return Err(LedgerError::Decode(format!(
                    "asked for {first} records at {skip}, got {got}"
                )));
            }
            out.extend(page);
            if got < first {
                break;
            }
            skip += got;
        }

        Ok(out)
    }
}

#[derive(Deserialize)]
struct GraphResponse {
    data: Option<EarnedBadgeData>,
    #[serde(default)]
    errors: Vec<GraphError>,
}

#[derive(Deserialize)]
struct GraphError {
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EarnedBadgeData {
    earned_badge_counts: Vec<EarnedBadgeCount>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EarnedBadgeCount {
    global_badge_number: BigIntValue,
    earned_badge: EarnedBadge,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EarnedBadge {
    badge_winner: BadgeWinner,
    definition: Definition,
}

#[derive(Deserialize)]
struct BadgeWinner {
    id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Definition {
    badge_definition_number: BigIntValue,
}

/// Subgraph BigInt fields arrive as JSON strings; plain numbers are accepted too
#[derive(Deserialize)]
#[serde(untagged)]
enum BigIntValue {
    Number(i64),
    Text(String),
}

impl BigIntValue {
    fn parse<T: std::str::FromStr + TryFrom<i64>>(&self, field: &str) -> Result<T, LedgerError> {
        let bad = || LedgerError::Decode(format!("{field}: not representable: {}", self.describe()));
        match self {
            BigIntValue::Number(n) => T::try_from(*n).map_err(|_| bad()),
            BigIntValue::Text(s) => s.trim().parse::<T>().map_err(|_| bad()),
        }
    }

    fn describe(&self) -> String {
        match self {
            BigIntValue::Number(n) => n.to_string(),
            BigIntValue::Text(s) => format!("{s:?}"),
        }
    }
}

impl EarnedBadgeCount {
    fn into_raw(self) -> Result<RawBadgeAward, LedgerError> {
        Ok(RawBadgeAward {
            winner: self.earned_badge.badge_winner.id,
            badge_definition_number: self
                .earned_badge
                .definition
                .badge_definition_number
                .parse("badgeDefinitionNumber")?,
            global_badge_number: self.global_badge_number.parse("globalBadgeNumber")?,
        })
    }
}
