//! Local Reed-Solomon reconstruction of erasure-coded chunks.

use anyhow::{bail, Error};
use cds_api_types::ContentHash;
use reed_solomon_erasure::galois_8::ReedSolomon;

/// One fragment as fetched from a node, keyed by its index in `0..k+m`.
pub struct Fragment {
    pub index: u8,
    pub bytes: Vec<u8>,
}

/// Reconstructs the original chunk bytes from any `k` of the `k + m`
/// fragments and checks the result against `expected_hash`.
///
/// `fragments` need not be sorted or complete; any `k` distinct indices
/// suffice. `original_len` trims the padding the encoder added to make
/// every fragment the same length.
pub fn reconstruct(
    k: u8,
    m: u8,
    fragments: &[Fragment],
    original_len: usize,
    expected_hash: &ContentHash,
) -> Result<Vec<u8>, Error> {
    let present: usize = fragments
        .iter()
        .map(|f| f.index)
        .collect::<std::collections::HashSet<_>>()
        .len();
    if present < k as usize {
        bail!("need at least {k} distinct fragments, got {present}");
    }

    let total = (k + m) as usize;
    let mut shards: Vec<Option<Vec<u8>>> = vec![None; total];
    for fragment in fragments {
        let idx = fragment.index as usize;
        if idx < total {
            shards[idx] = Some(fragment.bytes.clone());
        }
    }

    let rs = ReedSolomon::new(k as usize, m as usize)?;
    rs.reconstruct(&mut shards)?;

    let mut data = Vec::with_capacity(k as usize * shards[0].as_ref().map(|s| s.len()).unwrap_or(0));
    for shard in shards.into_iter().take(k as usize) {
        data.extend(shard.expect("reconstruct fills every shard or errors"));
    }
    data.truncate(original_len);

    let actual_hash = ContentHash::of(&data);
    if actual_hash != *expected_hash {
        bail!("reconstructed chunk hash {actual_hash} does not match expected {expected_hash}");
    }
    Ok(data)
}

/// Splits `data` into `k` data shards padded to equal length plus `m` parity
/// shards. Used only by tests here; the coordinator-facing writer path that
/// calls this in production lives alongside the commit-proposal client.
pub fn encode(k: u8, m: u8, data: &[u8]) -> Result<Vec<Vec<u8>>, Error> {
    let shard_len = data.len().div_ceil(k as usize).max(1);
    let mut shards: Vec<Vec<u8>> = Vec::with_capacity((k + m) as usize);
    for i in 0..k as usize {
        let start = i * shard_len;
        let end = (start + shard_len).min(data.len());
        let mut shard = if start < data.len() {
            data[start..end].to_vec()
        } else {
            Vec::new()
        };
        shard.resize(shard_len, 0);
        shards.push(shard);
    }
    for _ in 0..m {
        shards.push(vec![0u8; shard_len]);
    }

    let rs = ReedSolomon::new(k as usize, m as usize)?;
    rs.encode(&mut shards)?;
    Ok(shards)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_k_of_n_fragments_reconstruct_original() {
        let data = b"the quick brown fox jumps over the lazy dog, repeated".repeat(4);
        let hash = ContentHash::of(&data);
        let shards = encode(3, 2, &data).unwrap();

        let fragments: Vec<Fragment> = shards
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != 1 && *i != 3) // drop two, keep 3 of 5
            .map(|(i, s)| Fragment {
                index: i as u8,
                bytes: s.clone(),
            })
            .collect();

        let reconstructed = reconstruct(3, 2, &fragments, data.len(), &hash).unwrap();
        assert_eq!(reconstructed, data);
    }

    #[test]
    fn fewer_than_k_fragments_fails_fast() {
        let data = b"short".to_vec();
        let hash = ContentHash::of(&data);
        let shards = encode(3, 2, &data).unwrap();
        let fragments = vec![Fragment {
            index: 0,
            bytes: shards[0].clone(),
        }];
        assert!(reconstruct(3, 2, &fragments, data.len(), &hash).is_err());
    }
}
