#![forbid(unsafe_code)]
//! Partial-ID resolution: exact match, prefix-normalized match, hash
//! portion across prefixes, then substring. Ambiguity fails with the
//! candidate list; tombstones never win substring disambiguation.

use super::{MatchType, ResolvedId, SqliteStore, StoreError};
use braid_core::idgen::split_id;
use braid_core::model::Issue;

impl SqliteStore {
    /// Resolve a partial ID and load the issue it names.
    pub fn get_by_prefix(&self, partial: &str) -> Result<Issue, StoreError> {
        let resolved = self.resolve_id(partial)?;
        self.get_issue_any(&resolved.id)?
            .ok_or(StoreError::NotFound { id: resolved.id })
    }

    pub fn resolve_id(&self, input: &str) -> Result<ResolvedId, StoreError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(StoreError::NotFound {
                id: input.to_string(),
            });
        }

        if self.id_exists(input)? {
            return Ok(ResolvedId {
                id: input.to_string(),
                match_type: MatchType::Exact,
            });
        }

        let normalized = format!("{}-{input}", self.issue_prefix()?);
        if self.id_exists(&normalized)? {
            return Ok(ResolvedId {
                id: normalized,
                match_type: MatchType::Normalized,
            });
        }

        // Exact hash-portion match across prefixes.
        let all: Vec<(String, bool)> = {
            let mut stmt = self
                .conn
                .prepare("SELECT id, status = 'tombstone' FROM issues")?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let hash_matches: Vec<String> = all
            .iter()
            .filter(|(id, _)| split_id(id).is_some_and(|(_, hash)| hash == input))
            .map(|(id, _)| id.clone())
            .collect();
        match hash_matches.len() {
            1 => {
                return Ok(ResolvedId {
                    id: hash_matches.into_iter().next().unwrap_or_default(),
                    match_type: MatchType::HashPortion,
                })
            }
            n if n > 1 => {
                return Err(StoreError::AmbiguousId {
                    input: input.to_string(),
                    candidates: hash_matches,
                })
            }
            _ => {}
        }

        // Substring scan, tombstones excluded from disambiguation.
        let substring_matches: Vec<String> = all
            .iter()
            .filter(|(id, tombstone)| !tombstone && id.contains(input))
            .map(|(id, _)| id.clone())
            .collect();
        match substring_matches.len() {
            0 => Err(StoreError::NotFound {
                id: input.to_string(),
            }),
            1 => Ok(ResolvedId {
                id: substring_matches.into_iter().next().unwrap_or_default(),
                match_type: MatchType::Substring,
            }),
            _ => Err(StoreError::AmbiguousId {
                input: input.to_string(),
                candidates: substring_matches,
            }),
        }
    }
}
