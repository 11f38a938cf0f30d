use crate::domain::{ProxyRequest, RewriteRule};
use crate::ports::AcceptPort;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Lets every request through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

#[async_trait]
impl AcceptPort for AcceptAll {
    async fn accept(&self, _: &CancellationToken, _: &mut ProxyRequest) -> bool {
        true
    }
}

/// Accept policy built from configuration.
///
/// A request is allowed when its `host:port` target starts with one of the
/// allowed prefixes, or when no prefix is configured. Allowed targets listed
/// in the rewrite rules are then redirected to their replacement.
pub struct RuleAccept {
    allowed_prefixes: Vec<String>,
    rewrites: HashMap<String, String>,
}

impl RuleAccept {
    pub fn new(allowed_prefixes: Vec<String>, rewrite_rules: Vec<RewriteRule>) -> Self {
        let rewrites = rewrite_rules
            .into_iter()
            .map(|rule| (rule.target, rule.replacement))
            .collect();
        Self {
            allowed_prefixes,
            rewrites,
        }
    }

    fn is_allowed(&self, target: &str) -> bool {
        self.allowed_prefixes.is_empty() || self.allowed_prefixes.iter().any(|prefix| target.starts_with(prefix))
    }
}

#[async_trait]
impl AcceptPort for RuleAccept {
    async fn accept(&self, _: &CancellationToken, request: &mut ProxyRequest) -> bool {
        if !self.is_allowed(&request.target) {
            log::debug!("{} is not in the allow list", request.target);
            return false;
        }
        if let Some(replacement) = self.rewrites.get(&request.target) {
            log::debug!("rewriting {} to {}", request.target, replacement);
            request.target = replacement.clone();
        }
        true
    }
}
