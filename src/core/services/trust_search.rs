use crate::core::models::trust_entry::TrustEntry;

const EXACT_FIELD_WEIGHT: u32 = 10;
const SUBSTRING_WEIGHT: u32 = 5;

/// A search hit and its relevance.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub entry: TrustEntry,
    pub score: u32,
}

/// Rank `entries` against a free-text query.
///
/// Fields searched: fingerprint, key id, added-by, source, notes and
/// metadata values. A field equal to the whole query earns 10, a field
/// containing it 5, and every occurrence of each whitespace-separated
/// term earns 1. Entries scoring zero are dropped. Ties sort by
/// fingerprint so results are stable.
pub fn search<'a>(entries: impl IntoIterator<Item = &'a TrustEntry>, query: &str) -> Vec<SearchHit> {
    let query = query.trim().to_lowercase();
    let terms: Vec<&str> = query.split_whitespace().collect();

    let mut hits: Vec<SearchHit> = entries
        .into_iter()
        .filter_map(|entry| {
            let score = relevance(entry, &query, &terms);
            (score > 0).then(|| SearchHit {
                entry: entry.clone(),
                score,
            })
        })
        .collect();

    hits.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then_with(|| a.entry.fingerprint.cmp(&b.entry.fingerprint))
    });
    hits
}

fn relevance(entry: &TrustEntry, query: &str, terms: &[&str]) -> u32 {
    let mut fields: Vec<String> = vec![
        entry.fingerprint.as_str().to_string(),
        entry.added_by.to_lowercase(),
        entry.source.to_lowercase(),
        entry.notes.to_lowercase(),
    ];
    if let Some(key_id) = &entry.key_id {
        fields.push(key_id.to_lowercase());
    }
    fields.extend(entry.metadata.values().map(|v| v.to_lowercase()));

    let mut score = 0;
    for field in fields.iter().filter(|f| !f.is_empty()) {
        if field == query {
            score += EXACT_FIELD_WEIGHT;
        } else if field.contains(query) {
            score += SUBSTRING_WEIGHT;
        }
        for term in terms {
            score += field.matches(term).count() as u32;
        }
    }
    score
}
