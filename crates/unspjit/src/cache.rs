use std::hash::{Hash, Hasher};

use cranelift::codegen::isa::TargetIsa;
use rustc_hash::FxHashMap;

use crate::{Artifact, Sequence, Settings};

struct Hash128(twox_hash::XxHash3_128);

impl Hasher for Hash128 {
    fn finish(&self) -> u64 {
        unimplemented!()
    }

    #[inline(always)]
    fn write(&mut self, bytes: &[u8]) {
        self.0.write(bytes);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArtifactKey(u128);

impl ArtifactKey {
    pub fn new(isa: &dyn TargetIsa, settings: &Settings, seq: &Sequence) -> Self {
        let mut hasher = Hash128(twox_hash::XxHash3_128::with_seed(0));
        isa.name().hash(&mut hasher);
        isa.triple().hash(&mut hasher);
        isa.flags().hash(&mut hasher);
        isa.isa_flags_hash_key().hash(&mut hasher);
        settings.hash(&mut hasher);
        seq.hash(&mut hasher);
        Self(hasher.0.finish_128())
    }
}

/// Compiled artifacts, kept across invalidations so that code which is rewritten with the same
/// contents (or re-run after a reset) is not compiled again.
#[derive(Default)]
pub struct Cache {
    artifacts: FxHashMap<ArtifactKey, Artifact>,
    hits: u64,
}

impl Cache {
    pub fn get(&mut self, key: ArtifactKey) -> Option<Artifact> {
        let artifact = self.artifacts.get(&key).cloned();
        if artifact.is_some() {
            self.hits += 1;
        }

        artifact
    }

    pub fn insert(&mut self, key: ArtifactKey, artifact: &Artifact) {
        self.artifacts.insert(key, artifact.clone());
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }
}
