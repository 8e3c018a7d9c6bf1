//! Fuzzy query construction: edit distance 1 with prefix matching per
//! token, OR'd across `title`/`content`, AND'd across tokens, with an
//! optional exact-term `agent` filter AND'd in.

use crate::{SearchError, SearchIndex};
use session_scan_core::error::ScanError;
use session_scan_core::types::Agent;
use tantivy::query::{BooleanQuery, FuzzyTermQuery, Occur, Query, TermQuery};
use tantivy::schema::IndexRecordOption;
use tantivy::Term;
use tracing::warn;

impl SearchIndex {
    /// Returns `(id, score)` pairs, best first. An empty `query` returns an
    /// empty result set — the caller serves the recency-ordered list
    /// instead. Any query-construction failure is swallowed into an empty
    /// result set.
    pub fn search(
        &self,
        query: &str,
        agent_filter: Option<Agent>,
        limit: usize,
    ) -> Result<Vec<(String, f32)>, SearchError> {
        let tokens: Vec<&str> = query.split_whitespace().filter(|t| !t.is_empty()).collect();
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        let built = self.build_fuzzy_query(&tokens, agent_filter);
        let Some(built) = built else {
            return Ok(Vec::new());
        };

        let searcher = self.reader.searcher();
        let top_docs = searcher.search(&built, &tantivy::collector::TopDocs::with_limit(limit.max(1)))?;

        let mut out = Vec::new();
        for (score, addr) in top_docs {
            let doc: tantivy::TantivyDocument = searcher.doc(addr)?;
            if let Some(id) = doc
                .get_first(self.id_field)
                .and_then(|v| {
                    use tantivy::schema::document::Value;
                    v.as_str()
                })
                .map(String::from)
            {
                out.push((id, score));
            }
        }
        Ok(out)
    }

    fn build_fuzzy_query(&self, tokens: &[&str], agent_filter: Option<Agent>) -> Option<Box<dyn Query>> {
        let mut per_token_clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();

        for token in tokens {
            let title_term = Term::from_field_text(self.title_field, token);
            let content_term = Term::from_field_text(self.content_field, token);

            let title_query: Box<dyn Query> =
                Box::new(FuzzyTermQuery::new(title_term, 1, true));
            let content_query: Box<dyn Query> =
                Box::new(FuzzyTermQuery::new(content_term, 1, true));

            let either_field = BooleanQuery::new(vec![
                (Occur::Should, title_query),
                (Occur::Should, content_query),
            ]);
            per_token_clauses.push((Occur::Must, Box::new(either_field)));
        }

        if let Some(agent) = agent_filter {
            let term = Term::from_field_text(self.agent_field, agent.tag());
            let agent_query: Box<dyn Query> = Box::new(TermQuery::new(term, IndexRecordOption::Basic));
            per_token_clauses.push((Occur::Must, agent_query));
        }

        if per_token_clauses.is_empty() {
            let err = ScanError::QueryMalformed {
                reason: "no usable clause from tokens or agent filter".to_string(),
            };
            warn!(%err, "query construction produced no clauses, returning empty result set");
            None
        } else {
            Some(Box::new(BooleanQuery::new(per_token_clauses)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use session_scan_core::types::SessionRecord;

    fn sample(id: &str, agent: Agent, title: &str, content: &str) -> SessionRecord {
        SessionRecord {
            id: id.to_string(),
            agent,
            title: title.to_string(),
            directory: "/home/u/proj".to_string(),
            timestamp: chrono::Utc::now(),
            preview: content.to_string(),
            content: content.to_string(),
            message_count: 1,
            mtime: 1_700_000_000.0,
            yolo: false,
        }
    }

    #[test]
    fn fuzzy_query_matches_single_edit_typo() {
        let index = SearchIndex::open_in_ram().unwrap();
        index
            .add(&[
                sample("s1", Agent::Claude, "authentication bug", "fix the login flow"),
                sample("s2", Agent::Claude, "rate limiting", "throttle requests"),
            ])
            .unwrap();

        let hits = index.search("athentication", None, 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "s1");
    }

    #[test]
    fn empty_query_returns_nothing_from_index() {
        let index = SearchIndex::open_in_ram().unwrap();
        index.add(&[sample("s1", Agent::Claude, "x", "y")]).unwrap();
        assert!(index.search("", None, 10).unwrap().is_empty());
    }

    #[test]
    fn agent_filter_excludes_other_agents() {
        let index = SearchIndex::open_in_ram().unwrap();
        index
            .add(&[
                sample("s1", Agent::Claude, "shared term", "shared term body"),
                sample("s2", Agent::Codex, "shared term", "shared term body"),
            ])
            .unwrap();

        let hits = index.search("shared", Some(Agent::Claude), 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "s1");
    }
}
