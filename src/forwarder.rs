//! C8: forwards unresolved frames to a peer symbolication server and merges
//! the reply back into the caller's result array.
//!
//! Grounded on `original_source/symbolicationRequest.py`'s `ForwardRequest`:
//! a synthetic request carrying only the unresolved modules (densely
//! reindexed) and a single flattened stack of the unresolved entries, tried
//! first at `version=4` and retried once at `version=3` on any failure.
//! Length-mismatch or decode failure aborts silently; the caller's
//! placeholders are left untouched.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ForwardError;
use crate::request::Request;

/// One stack entry that the symbolicator could not resolve locally,
/// carrying enough of its original position to write a peer-supplied name
/// back into the right place.
#[derive(Debug, Clone, Copy)]
pub struct UnresolvedEntry {
    pub stack_index: usize,
    pub pc_index: usize,
    pub module_index: usize,
    pub offset: u64,
}

pub struct Forwarder {
    client: reqwest::Client,
    remote_symbol_server: String,
    timeout: Duration,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ForwardRequestBody<'a> {
    version: u32,
    memory_map: &'a [(String, String)],
    stacks: [&'a [(i32, u64)]; 1],
    forwarded: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ForwardResponseV4 {
    symbolicated_stacks: Vec<Vec<String>>,
    known_modules: Vec<bool>,
}

struct ForwardReply {
    names: Vec<String>,
    known_modules: Option<Vec<bool>>,
}

impl Forwarder {
    /// `remote_symbol_server` is assumed non-empty; `Config::with_remote_symbol_server`
    /// already turns an empty string into `None` so a `Forwarder` is only ever
    /// constructed when forwarding is actually configured.
    pub fn new(remote_symbol_server: String, timeout: Duration) -> Self {
        Forwarder {
            client: reqwest::Client::new(),
            remote_symbol_server,
            timeout,
        }
    }

    /// Tries v4 first, falls back to v3 once on any failure. Writes
    /// resolved names directly into `symbolicated_stacks` and flips
    /// `known_modules` entries the peer reports as known. Never returns an
    /// error: every failure is logged and the placeholders are left as-is.
    pub async fn forward_and_merge(
        &self,
        request: &Request,
        unresolved: &[UnresolvedEntry],
        symbolicated_stacks: &mut [Vec<String>],
        known_modules: &mut [bool],
    ) {
        if unresolved.is_empty() {
            return;
        }

        let mut module_order: Vec<usize> = Vec::new();
        let mut dense_index: HashMap<usize, usize> = HashMap::new();
        for entry in unresolved {
            dense_index.entry(entry.module_index).or_insert_with(|| {
                module_order.push(entry.module_index);
                module_order.len() - 1
            });
        }
        let memory_map: Vec<(String, String)> = module_order
            .iter()
            .map(|&i| (request.modules[i].lib_name.clone(), request.modules[i].breakpad_id.clone()))
            .collect();
        let stack: Vec<(i32, u64)> = unresolved
            .iter()
            .map(|e| (dense_index[&e.module_index] as i32, e.offset))
            .collect();

        match self.try_forward(request.forwarded + 1, 4, &memory_map, &stack).await {
            Ok(reply) => {
                self.apply_reply(reply, &module_order, unresolved, symbolicated_stacks, known_modules);
                return;
            }
            Err(e) => log::warn!("forward to {} (v4) failed: {e}", self.remote_symbol_server),
        }

        match self.try_forward(request.forwarded + 1, 3, &memory_map, &stack).await {
            Ok(reply) => self.apply_reply(reply, &module_order, unresolved, symbolicated_stacks, known_modules),
            Err(e) => log::warn!("forward to {} (v3 fallback) failed: {e}", self.remote_symbol_server),
        }
    }

    async fn try_forward(
        &self,
        forwarded: u32,
        version: u32,
        memory_map: &[(String, String)],
        stack: &[(i32, u64)],
    ) -> Result<ForwardReply, ForwardError> {
        let body = ForwardRequestBody {
            version,
            memory_map,
            stacks: [stack],
            forwarded,
        };

        let response = tokio::time::timeout(
            self.timeout,
            self.client.post(&self.remote_symbol_server).json(&body).send(),
        )
        .await
        .map_err(|_| ForwardError::Timeout)?
        .map_err(ForwardError::Http)?;

        let bytes = response.bytes().await.map_err(ForwardError::Http)?;

        if version == 4 {
            let parsed: ForwardResponseV4 = serde_json::from_slice(&bytes)?;
            let names = parsed.symbolicated_stacks.into_iter().next().unwrap_or_default();
            if names.len() != stack.len() {
                return Err(ForwardError::LengthMismatch {
                    expected: stack.len(),
                    got: names.len(),
                });
            }
            Ok(ForwardReply {
                names,
                known_modules: Some(parsed.known_modules),
            })
        } else {
            let parsed: Vec<Vec<String>> = serde_json::from_slice(&bytes)?;
            let names = parsed.into_iter().next().unwrap_or_default();
            if names.len() != stack.len() {
                return Err(ForwardError::LengthMismatch {
                    expected: stack.len(),
                    got: names.len(),
                });
            }
            Ok(ForwardReply {
                names,
                known_modules: None,
            })
        }
    }

    fn apply_reply(
        &self,
        reply: ForwardReply,
        module_order: &[usize],
        unresolved: &[UnresolvedEntry],
        symbolicated_stacks: &mut [Vec<String>],
        known_modules: &mut [bool],
    ) {
        for (i, entry) in unresolved.iter().enumerate() {
            if let Some(name) = reply.names.get(i) {
                symbolicated_stacks[entry.stack_index][entry.pc_index] = name.clone();
            }
        }
        if let Some(peer_known) = reply.known_modules {
            for (dense, &original) in module_order.iter().enumerate() {
                if peer_known.get(dense).copied().unwrap_or(false) {
                    known_modules[original] = true;
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::module_key::ModuleKey;
    use crate::request::{StackEntry, Version};

    fn request(forwarded: u32) -> Request {
        Request {
            version: Version::V4,
            modules: vec![ModuleKey::new("a.so", "ID1"), ModuleKey::new("b.so", "ID2")],
            stacks: vec![vec![
                StackEntry { module_index: 0, offset: 16 },
                StackEntry { module_index: 1, offset: 32 },
            ]],
            forwarded,
        }
    }

    #[tokio::test]
    async fn no_unresolved_entries_is_a_no_op() {
        let forwarder = Forwarder::new("http://127.0.0.1:1/nope".to_string(), Duration::from_millis(50));
        let request = request(0);
        let mut stacks = vec![vec!["a (in a.so)".to_string(), "b (in b.so)".to_string()]];
        let mut known = vec![true, true];
        forwarder.forward_and_merge(&request, &[], &mut stacks, &mut known).await;
        assert_eq!(stacks[0][0], "a (in a.so)");
    }

    #[tokio::test]
    async fn unreachable_peer_leaves_placeholders_untouched() {
        let forwarder = Forwarder::new(
            "http://127.0.0.1:1/symbolicate".to_string(),
            Duration::from_millis(100),
        );
        let request = request(0);
        let mut stacks = vec![vec!["0x10 (in a.so)".to_string(), "0x20 (in b.so)".to_string()]];
        let mut known = vec![false, false];
        let unresolved = vec![
            UnresolvedEntry {
                stack_index: 0,
                pc_index: 0,
                module_index: 0,
                offset: 16,
            },
            UnresolvedEntry {
                stack_index: 0,
                pc_index: 1,
                module_index: 1,
                offset: 32,
            },
        ];
        forwarder
            .forward_and_merge(&request, &unresolved, &mut stacks, &mut known)
            .await;
        assert_eq!(stacks[0][0], "0x10 (in a.so)");
        assert_eq!(stacks[0][1], "0x20 (in b.so)");
        assert_eq!(known, vec![false, false]);
    }
}
