//! Keys and signatures.
//!
//! Pure string functions addressing nodes in a tree. A node's signature is
//! `name` or `name(arg=value,...)`; its key is the `/`-joined signatures of
//! every node from the root down to it.
//!
//! Two addressing levels exist:
//! - [`KeyLevel::Full`] keeps every argument and uniquely names a node. It is
//!   used for store paths.
//! - [`KeyLevel::Collapsed`] renders wildcarded nodes as `name(*)`, so
//!   siblings that only differ by their arguments share a key. Shared
//!   collapsed keys are what triggers aggregation.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Separator between the signatures of a key.
pub const KEY_SEP: char = '/';
/// Separator between a protocol and its path.
pub const PROT_SEP: &str = "://";
pub const PROT_MEM: &str = "mem";
pub const PROT_FILE: &str = "file";
/// Length of generated in-memory store ids.
pub const RANDOM_ID_LEN: usize = 10;

/// Constructor arguments rendered into a signature, in name order.
pub type SignatureArgs = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyLevel {
    /// Level 1: every argument kept.
    Full,
    /// Level 2: wildcarded nodes collapse to `name(*)`.
    Collapsed,
}

// ─── Signatures ──────────────────────────────────────────────────────

/// Render a node signature.
pub fn signature(name: &str, args: &SignatureArgs, wildcard: bool, level: KeyLevel) -> String {
    if wildcard && level == KeyLevel::Collapsed {
        return format!("{}(*)", escape_component(name));
    }
    if args.is_empty() {
        return escape_component(name);
    }
    let rendered: Vec<String> = args
        .iter()
        .map(|(k, v)| format!("{}={}", escape_component(k), escape_component(v)))
        .collect();
    format!("{}({})", escape_component(name), rendered.join(","))
}

/// Escape characters that would break a key into extra path components.
pub fn escape_component(s: &str) -> String {
    if !s.contains(['/', '%']) {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len() + 4);
    for c in s.chars() {
        match c {
            '%' => out.push_str("%25"),
            '/' => out.push_str("%2F"),
            c => out.push(c),
        }
    }
    out
}

/// Inverse of [`escape_component`].
pub fn unescape_component(s: &str) -> String {
    s.replace("%2F", "/").replace("%25", "%")
}

// ─── Key paths ───────────────────────────────────────────────────────

/// Join signatures into a key.
pub fn join_key<I, S>(signatures: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut key = String::new();
    for (i, sig) in signatures.into_iter().enumerate() {
        if i > 0 {
            key.push(KEY_SEP);
        }
        key.push_str(sig.as_ref());
    }
    key
}

/// `key` + `/` + `basename`.
pub fn key_push(key: &str, basename: &str) -> String {
    if key.is_empty() {
        return basename.to_string();
    }
    format!("{key}{KEY_SEP}{basename}")
}

/// Split the last signature off a key: `a/b/c` → `("a/b", "c")`.
pub fn key_pop(key: &str) -> Option<(&str, &str)> {
    key.rsplit_once(KEY_SEP)
}

/// Split a protocol-qualified key: `file:///tmp/x` → `("file", "/tmp/x")`.
pub fn key_split(url: &str) -> Option<(&str, &str)> {
    url.split_once(PROT_SEP)
}

pub fn key_join(protocol: &str, path: &str) -> String {
    format!("{protocol}{PROT_SEP}{path}")
}

// ─── Store URLs ──────────────────────────────────────────────────────

/// Location of a persisted (or in-memory) tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreUrl {
    Mem(String),
    File(PathBuf),
}

impl StoreUrl {
    /// Fresh in-memory location with a random id.
    pub fn random_mem() -> Self {
        StoreUrl::Mem(random_id(&mut rand::thread_rng()))
    }

    pub fn parse(url: &str) -> Result<Self, String> {
        match key_split(url) {
            Some((PROT_MEM, id)) if !id.is_empty() => Ok(StoreUrl::Mem(id.to_string())),
            Some((PROT_FILE, path)) if !path.is_empty() => Ok(StoreUrl::File(PathBuf::from(path))),
            Some((prot, _)) => Err(format!("unknown protocol '{prot}' in '{url}'")),
            None => Err(format!("'{url}' has no protocol (expected mem:// or file://)")),
        }
    }
}

impl fmt::Display for StoreUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreUrl::Mem(id) => write!(f, "{}", key_join(PROT_MEM, id)),
            StoreUrl::File(path) => write!(f, "{}", key_join(PROT_FILE, &path.to_string_lossy())),
        }
    }
}

/// Random alphanumeric id of [`RANDOM_ID_LEN`] characters.
pub fn random_id<R: Rng + ?Sized>(rng: &mut R) -> String {
    rng.sample_iter(&Alphanumeric)
        .take(RANDOM_ID_LEN)
        .map(char::from)
        .collect()
}

// ─── Disambiguation helpers ──────────────────────────────────────────

/// Argument names whose values differ across the given states.
///
/// A name missing from some states but present in others counts as
/// differing.
pub fn dict_diff(states: &[SignatureArgs]) -> BTreeSet<String> {
    let all: BTreeSet<&String> = states.iter().flat_map(|s| s.keys()).collect();
    all.into_iter()
        .filter(|name| {
            let mut values = states.iter().map(|s| s.get(*name));
            match values.next() {
                Some(first) => values.any(|v| v != first),
                None => false,
            }
        })
        .cloned()
        .collect()
}

/// Restrict a state to the given argument names.
pub fn sub_dict(state: &SignatureArgs, names: &BTreeSet<String>) -> SignatureArgs {
    state
        .iter()
        .filter(|(k, _)| names.contains(*k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Groups of indices whose keys are equal, in order of first appearance.
/// Singletons are omitted.
pub fn collisions(keys: &[String]) -> Vec<Vec<usize>> {
    let mut order: Vec<&str> = Vec::new();
    let mut groups: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (i, key) in keys.iter().enumerate() {
        let slot = groups.entry(key.as_str()).or_default();
        if slot.is_empty() {
            order.push(key.as_str());
        }
        slot.push(i);
    }
    order
        .into_iter()
        .filter_map(|k| groups.remove(k))
        .filter(|g| g.len() > 1)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(pairs: &[(&str, &str)]) -> SignatureArgs {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn signature_levels() {
        let a = args(&[("C", "1"), ("kernel", "linear")]);
        assert_eq!(signature("SVC", &a, false, KeyLevel::Full), "SVC(C=1,kernel=linear)");
        assert_eq!(signature("SVC", &a, false, KeyLevel::Collapsed), "SVC(C=1,kernel=linear)");
        assert_eq!(signature("SVC", &a, true, KeyLevel::Collapsed), "SVC(*)");
        assert_eq!(signature("LDA", &SignatureArgs::new(), false, KeyLevel::Full), "LDA");
    }

    #[test]
    fn signature_escapes_separators() {
        let a = args(&[("path", "a/b")]);
        let sig = signature("Load", &a, false, KeyLevel::Full);
        assert_eq!(sig, "Load(path=a%2Fb)");
        assert!(!sig.contains(KEY_SEP));
        assert_eq!(unescape_component("a%2Fb%25"), "a/b%");
    }

    #[test]
    fn key_push_and_pop() {
        let key = key_push(&key_push("CV", "CV(nb=0)"), "SVC");
        assert_eq!(key, "CV/CV(nb=0)/SVC");
        assert_eq!(key_pop(&key), Some(("CV/CV(nb=0)", "SVC")));
        assert_eq!(key_pop("CV"), None);
        assert_eq!(join_key(["a", "b"]), "a/b");
    }

    #[test]
    fn store_urls_parse_and_print() {
        assert_eq!(StoreUrl::parse("mem://abc").unwrap(), StoreUrl::Mem("abc".into()));
        let url = StoreUrl::parse("file:///tmp/tree").unwrap();
        assert_eq!(url, StoreUrl::File(PathBuf::from("/tmp/tree")));
        assert_eq!(url.to_string(), "file:///tmp/tree");
        assert!(StoreUrl::parse("s3://bucket").is_err());
        assert!(StoreUrl::parse("/tmp/tree").is_err());
    }

    #[test]
    fn random_ids_have_fixed_length() {
        let id = random_id(&mut rand::thread_rng());
        assert_eq!(id.len(), RANDOM_ID_LEN);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        match StoreUrl::random_mem() {
            StoreUrl::Mem(id) => assert_eq!(id.len(), RANDOM_ID_LEN),
            other => panic!("expected mem url, got {other:?}"),
        }
    }

    #[test]
    fn dict_diff_finds_varying_args() {
        let states = vec![
            args(&[("C", "1"), ("kernel", "linear")]),
            args(&[("C", "1"), ("kernel", "rbf")]),
        ];
        let diff = dict_diff(&states);
        assert_eq!(diff.into_iter().collect::<Vec<_>>(), vec!["kernel".to_string()]);

        let same = vec![args(&[("C", "1")]), args(&[("C", "1")])];
        assert!(dict_diff(&same).is_empty());

        let missing = vec![args(&[("C", "1")]), args(&[])];
        assert!(dict_diff(&missing).contains("C"));
    }

    #[test]
    fn sub_dict_restricts() {
        let state = args(&[("C", "1"), ("kernel", "rbf")]);
        let names: BTreeSet<String> = ["kernel".to_string()].into_iter().collect();
        assert_eq!(sub_dict(&state, &names), args(&[("kernel", "rbf")]));
    }

    #[test]
    fn collisions_in_first_appearance_order() {
        let keys: Vec<String> = ["b", "a", "b", "c", "a"].iter().map(|s| s.to_string()).collect();
        assert_eq!(collisions(&keys), vec![vec![0, 2], vec![1, 4]]);
        assert!(collisions(&["x".to_string()]).is_empty());
    }
}
