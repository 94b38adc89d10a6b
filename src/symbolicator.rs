//! C7: resolves every stack in a validated request to human-readable names,
//! consulting C5 once per request and delegating any leftover misses to C8
//! (§4.7). Never fails: the worst outcome is every frame rendered as a
//! `hex(offset)` placeholder.
//!
//! Grounded on `original_source/symbolicationRequest.py`'s `Symbolicate`.

use crate::cache_manager::CacheManager;
use crate::forwarder::{Forwarder, UnresolvedEntry};
use crate::request::Request;

pub struct SymbolicationResult {
    pub symbolicated_stacks: Vec<Vec<String>>,
    /// Always `request.modules.len()` long, regardless of request version;
    /// the JSON layer omits this field entirely for V3 responses (§6).
    pub known_modules: Vec<bool>,
}

/// Forwarding is enabled iff a remote server is configured and the request
/// hasn't already bounced through `forwardCount` hops (§4.7).
fn forwarding_enabled(forwarder: Option<&Forwarder>, request: &Request) -> bool {
    forwarder.is_some() && request.forwarded < 3
}

pub async fn symbolicate(
    request: &Request,
    cache_manager: &CacheManager,
    forwarder: Option<&Forwarder>,
) -> SymbolicationResult {
    let hits = cache_manager.get_lib_symbol_maps(&request.modules).await;
    let mut known_modules: Vec<bool> = request.modules.iter().map(|m| hits.contains_key(m)).collect();

    let should_forward = forwarding_enabled(forwarder, request);
    let mut unresolved: Vec<UnresolvedEntry> = Vec::new();
    let mut symbolicated_stacks = Vec::with_capacity(request.stacks.len());

    for (stack_index, stack) in request.stacks.iter().enumerate() {
        let mut names = Vec::with_capacity(stack.len());
        for (pc_index, frame) in stack.iter().enumerate() {
            if frame.module_index == -1 {
                names.push(format!("{:#x}", frame.offset));
                continue;
            }

            let Some(module) = usize::try_from(frame.module_index).ok().and_then(|i| request.modules.get(i)) else {
                names.push(format!("{:#x}", frame.offset));
                continue;
            };

            let resolved_name = hits.get(module).and_then(|table| table.lookup(frame.offset));
            match resolved_name {
                Some(name) => names.push(format!("{name} (in {})", module.lib_name)),
                None => {
                    names.push(format!("{:#x} (in {})", frame.offset, module.lib_name));
                    if should_forward {
                        unresolved.push(UnresolvedEntry {
                            stack_index,
                            pc_index,
                            module_index: frame.module_index as usize,
                            offset: frame.offset,
                        });
                    }
                }
            }
        }
        symbolicated_stacks.push(names);
    }

    if let Some(forwarder) = forwarder {
        if !unresolved.is_empty() {
            forwarder
                .forward_and_merge(request, &unresolved, &mut symbolicated_stacks, &mut known_modules)
                .await;
        }
    }

    SymbolicationResult {
        symbolicated_stacks,
        known_modules,
    }
}
