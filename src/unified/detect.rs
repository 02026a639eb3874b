//! Graph-type detection.
//!
//! An explicit `graph_type` tag wins. Otherwise the serialized query is
//! tokenized and sniffed for domain keywords and content identifiers.

use crate::query::{GraphType, Query};

const WIKIPEDIA_TOKENS: [&str; 3] = ["wikipedia", "wikidata", "dbpedia"];
const IPLD_TOKENS: [&str; 4] = ["ipld", "cid", "dag", "ipfs"];

/// CIDv0 multihashes are 46 base58 characters starting with `Qm`.
fn is_cid_v0(token: &str) -> bool {
    token.len() == 46 && token.starts_with("qm")
}

/// CIDv1 in the default base32 encoding starts with `bafy`.
fn is_cid_v1(token: &str) -> bool {
    token.len() > 50 && token.starts_with("bafy")
}

/// Wikidata item ids (`Q42`) and property ids (`P31`).
fn is_wikidata_id(token: &str) -> bool {
    let mut chars = token.chars();
    matches!(chars.next(), Some('q' | 'p'))
        && token.len() > 1
        && chars.all(|c| c.is_ascii_digit())
}

fn explicit_type(query: &Query) -> Option<GraphType> {
    let tag = query.graph_type.as_deref()?;
    let parsed = GraphType::parse(tag);
    if parsed.is_none() {
        tracing::debug!(tag, "unknown graph_type tag, sniffing instead");
    }
    parsed
}

/// Graph type for `query`: explicit tag, then keywords, then general.
pub fn detect_graph_type(query: &Query) -> GraphType {
    if let Some(graph_type) = explicit_type(query) {
        tracing::debug!(graph_type = graph_type.as_str(), "explicit graph type");
        return graph_type;
    }

    // Leave the vector out; it only adds numeric tokens.
    let mut probe = query.clone();
    probe.query_vector = None;
    let text = probe.to_value().to_string().to_lowercase();

    let mut wikipedia = 0usize;
    let mut ipld = 0usize;
    for token in text.split(|c: char| !c.is_ascii_alphanumeric()) {
        if token.is_empty() {
            continue;
        }
        if WIKIPEDIA_TOKENS.contains(&token) {
            wikipedia += 2;
        } else if IPLD_TOKENS.contains(&token) || is_cid_v0(token) || is_cid_v1(token) {
            ipld += 2;
        } else if is_wikidata_id(token) {
            wikipedia += 1;
        }
    }

    let detected = if ipld > wikipedia {
        GraphType::Ipld
    } else if wikipedia >= 2 {
        GraphType::Wikipedia
    } else {
        GraphType::General
    };
    tracing::debug!(
        graph_type = detected.as_str(),
        wikipedia_votes = wikipedia,
        ipld_votes = ipld,
        "detected graph type"
    );
    detected
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn query(value: serde_json::Value) -> Query {
        Query::from_value(&value).unwrap()
    }

    #[test]
    fn explicit_tag_wins() {
        let q = query(json!({"graph_type": "ipld", "query_text": "wikipedia article"}));
        assert_eq!(detect_graph_type(&q), GraphType::Ipld);
    }

    #[test]
    fn keywords_select_wikipedia() {
        let q = query(json!({"query_text": "Which Wikidata items cite this?"}));
        assert_eq!(detect_graph_type(&q), GraphType::Wikipedia);
    }

    #[test]
    fn keywords_select_ipld() {
        let q = query(json!({"query_text": "walk the DAG from this root"}));
        assert_eq!(detect_graph_type(&q), GraphType::Ipld);
        let cid = "QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG";
        let q = query(json!({"entity_ids": [cid]}));
        assert_eq!(detect_graph_type(&q), GraphType::Ipld);
    }

    #[test]
    fn keyword_match_is_token_based() {
        // "decide" contains "cid" but is not a token match.
        let q = query(json!({"query_text": "help me decide"}));
        assert_eq!(detect_graph_type(&q), GraphType::General);
    }

    #[test]
    fn wikidata_ids_need_two_votes() {
        let q = query(json!({"entity_ids": ["Q42"]}));
        assert_eq!(detect_graph_type(&q), GraphType::General);
        let q = query(json!({"entity_ids": ["Q42", "Q5"]}));
        assert_eq!(detect_graph_type(&q), GraphType::Wikipedia);
    }

    #[test]
    fn unknown_tag_falls_back_to_sniffing() {
        let q = query(json!({"graph_type": "neo4j", "query_text": "dbpedia"}));
        assert_eq!(detect_graph_type(&q), GraphType::Wikipedia);
    }
}
