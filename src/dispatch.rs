//! Downstream Dispatcher: shards one filtered frame across `H`
//! host endpoints of `K` channels each, pads short tails, and optionally
//! mirrors the full vector to a "ghost" host.

use std::sync::Arc;

use tracing::warn;

use crate::store::GlobalParams;
use crate::transport::{Arg, TransportPool};

/// Remap logical channel `i` to its physical channel via
/// `motor_position_mapping` (identity if the mapping is empty or shorter
/// than `N`).
pub fn apply_mapping(v: &[i64], mapping: &[usize]) -> Vec<i64> {
    if mapping.len() != v.len() {
        return v.to_vec();
    }
    mapping.iter().map(|&src| v[src]).collect()
}

/// Split `mapped` into per-host slices of `K` channels, padding the last
/// slice with `stroke_offset` if short.
pub fn shard(mapped: &[i64], hosts: usize, vals_per_host: usize, pad: i64) -> Vec<Vec<i64>> {
    (0..hosts)
        .map(|h| {
            let start = h * vals_per_host;
            let end = (start + vals_per_host).min(mapped.len());
            let mut slice = if start < mapped.len() {
                mapped[start..end].to_vec()
            } else {
                Vec::new()
            };
            while slice.len() < vals_per_host {
                slice.push(pad);
            }
            slice
        })
        .collect()
}

/// Dispatches filtered frames to the configured host endpoints (and
/// optional ghost mirror) over a [`TransportPool`].
pub struct Dispatcher {
    pool: Arc<TransportPool>,
}

impl Dispatcher {
    pub fn new(pool: Arc<TransportPool>) -> Self {
        Self { pool }
    }

    /// Run one dispatch cycle for filtered frame `v`.
    pub async fn dispatch(&self, v: &[i64], global: &GlobalParams) {
        let mapped = apply_mapping(v, &global.motor_position_mapping);
        let shards = shard(&mapped, global.hosts.len(), global.vals_per_host, global.stroke_offset);

        if global.send_clients {
            for (h, slice) in shards.iter().enumerate() {
                let Some(host) = global.hosts.get(h) else {
                    continue;
                };
                let args: Vec<Arg> = slice.iter().map(|&x| Arg::Int(x)).collect();
                if let Err(e) = self.send_to(host, global.port, "/setTargetPositionList", &args).await {
                    warn!(host, port = global.port, error = %e, "dispatch to endpoint failed, continuing with other hosts");
                }
            }
        }

        if global.send_ghost {
            if let Some(ghost_host) = &global.ghost_host {
                let ghost_port = global.ghost_port.unwrap_or(global.port);
                let args: Vec<Arg> = mapped.iter().map(|&x| Arg::Int(x)).collect();
                if let Err(e) = self
                    .send_to(ghost_host, ghost_port, "/setTargetPositionList", &args)
                    .await
                {
                    warn!(host = ghost_host.as_str(), port = ghost_port, error = %e, "dispatch to ghost host failed");
                }
            }
        }
    }

    /// Diagnostic single-shot frame push, bypassing the engine (`/step`).
    pub async fn send_step(&self, v: &[i64], global: &GlobalParams) {
        self.dispatch(v, global).await;
    }

    /// Send `address`/`args` to every configured host (homing's broadcast
    /// calls: `/resetDevice`, `/setKval`, `/hardHiZ [255]`, …).
    pub async fn broadcast(&self, global: &GlobalParams, address: &str, args: &[Arg]) {
        for host in &global.hosts {
            if let Err(e) = self.send_to(host, global.port, address, args).await {
                warn!(host, port = global.port, address, error = %e, "broadcast to endpoint failed, continuing with other hosts");
            }
        }
    }

    /// Send `address`/`args` to one endpoint addressed by `(endpoint_index,
    /// port)` — used by `homing(motor_id)` which targets a single board.
    pub async fn send_single(&self, global: &GlobalParams, endpoint_index: usize, address: &str, args: &[Arg]) -> std::io::Result<()> {
        let host = global
            .hosts
            .get(endpoint_index)
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "endpoint index out of range"))?;
        self.send_to(host, global.port, address, args).await
    }

    async fn send_to(&self, host: &str, port: u16, address: &str, args: &[Arg]) -> std::io::Result<()> {
        let sender = self.pool.get_or_connect(host, port).await?;
        sender.send(address, args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shard_law_concatenates_back_to_mapped() {
        let mapped: Vec<i64> = (1..=10).collect();
        let shards = shard(&mapped, 2, 8, 5);
        assert_eq!(shards[0], vec![1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(shards[1], vec![9, 10, 5, 5, 5, 5, 5, 5]);

        let mut concatenated: Vec<i64> = Vec::new();
        for (h, s) in shards.iter().enumerate() {
            let start = h * 8;
            let remaining = mapped.len().saturating_sub(start).min(8);
            concatenated.extend_from_slice(&s[..remaining]);
        }
        assert_eq!(concatenated, mapped);
    }

    #[test]
    fn test_identity_mapping_when_empty() {
        let v = vec![1, 2, 3];
        assert_eq!(apply_mapping(&v, &[]), v);
    }

    #[test]
    fn test_mapping_permutes_channels() {
        let v = vec![10, 20, 30];
        let mapping = vec![2, 0, 1];
        assert_eq!(apply_mapping(&v, &mapping), vec![30, 10, 20]);
    }
}
