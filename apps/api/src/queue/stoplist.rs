//! Stop-list filtering: exclusion rules evaluated at dispatch time.
//!
//! Rules live in the `stop_rules` table and are reloaded every dispatch
//! cycle, never cached in module state, so rule edits take effect on the
//! next claim. The first matching rule short-circuits; a blocked item is
//! recorded skipped and never handed to a handler.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use url::Url;

/// Kind of exclusion a rule expresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// Case-insensitive exact or substring match on company name.
    Company,
    /// Case-insensitive substring match on url or title.
    Keyword,
    /// Hostname match (exact host or subdomain of the rule's domain).
    Domain,
}

impl RuleKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "company" => Some(RuleKind::Company),
            "keyword" => Some(RuleKind::Keyword),
            "domain" => Some(RuleKind::Domain),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct StopRuleRow {
    pub id: uuid::Uuid,
    pub rule_kind: String,
    pub pattern: String,
}

#[derive(Debug, Clone)]
pub struct StopRule {
    pub kind: RuleKind,
    pub pattern: String,
}

/// The verdict for a blocked item: which rule fired and why.
#[derive(Debug, Clone, Serialize)]
pub struct BlockMatch {
    pub reason: String,
    pub matched_rule: String,
}

/// A freshly-loaded snapshot of the exclusion rules. Built per dispatch
/// cycle; holds no connection and goes stale by design.
#[derive(Debug, Clone, Default)]
pub struct StopList {
    rules: Vec<StopRule>,
}

impl StopList {
    pub fn new(rules: Vec<StopRule>) -> Self {
        Self { rules }
    }

    /// Loads the current rule set. Unparsable rows are dropped with a warning
    /// rather than blocking dispatch.
    pub async fn load(pool: &PgPool) -> Result<Self, sqlx::Error> {
        let rows: Vec<StopRuleRow> =
            sqlx::query_as("SELECT id, rule_kind, pattern FROM stop_rules")
                .fetch_all(pool)
                .await?;

        let rules = rows
            .into_iter()
            .filter_map(|row| match RuleKind::parse(&row.rule_kind) {
                Some(kind) => Some(StopRule {
                    kind,
                    pattern: row.pattern,
                }),
                None => {
                    tracing::warn!("Ignoring stop rule {} with unknown kind", row.id);
                    None
                }
            })
            .collect();

        Ok(StopList::new(rules))
    }

    /// Evaluates an item. First match wins; `None` means not blocked.
    pub fn evaluate(
        &self,
        url: &str,
        company_name: Option<&str>,
        title: Option<&str>,
    ) -> Option<BlockMatch> {
        for rule in &self.rules {
            let pattern_lower = rule.pattern.to_lowercase();
            let hit = match rule.kind {
                RuleKind::Company => company_name
                    .map(|name| name.to_lowercase().contains(&pattern_lower))
                    .unwrap_or(false),
                RuleKind::Keyword => {
                    url.to_lowercase().contains(&pattern_lower)
                        || title
                            .map(|t| t.to_lowercase().contains(&pattern_lower))
                            .unwrap_or(false)
                }
                RuleKind::Domain => host_matches(url, &pattern_lower),
            };

            if hit {
                return Some(BlockMatch {
                    reason: block_reason(rule),
                    matched_rule: rule.pattern.clone(),
                });
            }
        }
        None
    }
}

/// True when the url's hostname is the rule's domain or a subdomain of it.
fn host_matches(url: &str, domain: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let Some(host) = parsed.host_str() else {
        return false;
    };
    let host = host.to_lowercase();
    host == domain || host.ends_with(&format!(".{domain}"))
}

fn block_reason(rule: &StopRule) -> String {
    match rule.kind {
        RuleKind::Company => format!("company '{}' is excluded", rule.pattern),
        RuleKind::Keyword => format!("keyword '{}' is excluded", rule.pattern),
        RuleKind::Domain => format!("domain '{}' is excluded", rule.pattern),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(rules: Vec<(RuleKind, &str)>) -> StopList {
        StopList::new(
            rules
                .into_iter()
                .map(|(kind, pattern)| StopRule {
                    kind,
                    pattern: pattern.to_string(),
                })
                .collect(),
        )
    }

    #[test]
    fn test_domain_rule_blocks_matching_hostname() {
        let stop_list = list(vec![(RuleKind::Domain, "badco.com")]);
        let verdict = stop_list
            .evaluate("https://badco.com/job/1", None, None)
            .expect("should block");
        assert!(verdict.reason.contains("badco.com"));
        assert_eq!(verdict.matched_rule, "badco.com");
    }

    #[test]
    fn test_domain_rule_blocks_subdomain() {
        let stop_list = list(vec![(RuleKind::Domain, "badco.com")]);
        assert!(stop_list
            .evaluate("https://jobs.badco.com/listing", None, None)
            .is_some());
    }

    #[test]
    fn test_domain_rule_does_not_match_substring_host() {
        // "notbadco.com" contains "badco.com" as a suffix string but is a
        // different registrable domain.
        let stop_list = list(vec![(RuleKind::Domain, "badco.com")]);
        assert!(stop_list
            .evaluate("https://notbadco.com/job", None, None)
            .is_none());
    }

    #[test]
    fn test_company_rule_is_case_insensitive_substring() {
        let stop_list = list(vec![(RuleKind::Company, "Evil Corp")]);
        assert!(stop_list
            .evaluate("https://x.com/1", Some("EVIL CORP HOLDINGS"), None)
            .is_some());
        assert!(stop_list
            .evaluate("https://x.com/1", Some("Good Corp"), None)
            .is_none());
    }

    #[test]
    fn test_keyword_rule_matches_url_and_title() {
        let stop_list = list(vec![(RuleKind::Keyword, "crypto")]);
        assert!(stop_list
            .evaluate("https://x.com/crypto-jobs", None, None)
            .is_some());
        assert!(stop_list
            .evaluate("https://x.com/1", None, Some("Senior Crypto Engineer"))
            .is_some());
        assert!(stop_list.evaluate("https://x.com/1", None, None).is_none());
    }

    #[test]
    fn test_first_match_short_circuits() {
        let stop_list = list(vec![
            (RuleKind::Keyword, "badco"),
            (RuleKind::Domain, "badco.com"),
        ]);
        let verdict = stop_list
            .evaluate("https://badco.com/job", None, None)
            .unwrap();
        // The keyword rule comes first and also matches the url text.
        assert_eq!(verdict.matched_rule, "badco");
    }

    #[test]
    fn test_empty_list_blocks_nothing() {
        let stop_list = StopList::default();
        assert!(stop_list
            .evaluate("https://anything.com", Some("Any Co"), Some("Any role"))
            .is_none());
    }

    #[test]
    fn test_unparsable_url_never_matches_domain_rule() {
        let stop_list = list(vec![(RuleKind::Domain, "badco.com")]);
        assert!(stop_list.evaluate("not a url", None, None).is_none());
    }
}
