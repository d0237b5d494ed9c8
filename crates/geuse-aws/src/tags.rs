//! Uniform resource tag composition.
//!
//! Every created resource carries `Name`, `Stack`, `Tier`, and
//! `ManagedBy=GeuseMaker`. Networking resources additionally carry the
//! `geusemaker:deployment` / `geusemaker:tier` keys that orphan cleanup
//! discovers resources by.

use geuse_domain::Tier;

pub const MANAGED_BY: &str = "GeuseMaker";
pub const DEPLOYMENT_TAG_KEY: &str = "geusemaker:deployment";
pub const TIER_TAG_KEY: &str = "geusemaker:tier";
pub const STACK_TAG_KEY: &str = "Stack";

pub fn standard(stack: &str, tier: Tier, name: &str) -> Vec<(String, String)> {
    vec![
        ("Name".into(), name.into()),
        (STACK_TAG_KEY.into(), stack.into()),
        ("Tier".into(), tier.to_string()),
        ("ManagedBy".into(), MANAGED_BY.into()),
    ]
}

pub fn network(stack: &str, tier: Tier, name: &str) -> Vec<(String, String)> {
    let mut tags = standard(stack, tier, name);
    tags.push((DEPLOYMENT_TAG_KEY.into(), stack.into()));
    tags.push((TIER_TAG_KEY.into(), tier.to_string()));
    tags
}
