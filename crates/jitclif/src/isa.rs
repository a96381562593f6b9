//! Target ISA presets.

use cranelift_codegen::isa::{self, LookupError};
use cranelift_codegen::settings::{Configurable, SetError};
use easyerr::Error;
use strum::{FromRepr, IntoStaticStr, VariantArray};

#[derive(Debug, Error)]
pub enum TargetError {
    #[error(transparent)]
    Lookup { source: LookupError },
    #[error("failed to enable {flag}: {source}")]
    Flag {
        flag: &'static str,
        source: SetError,
    },
}

/// A code generation target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr, IntoStaticStr, VariantArray)]
#[strum(serialize_all = "snake_case")]
pub enum Target {
    /// Baseline x86_64 (SSE2 only).
    X86_64V1,
    /// x86_64 with AVX2, BMI and friends.
    X86_64V3,
    Aarch64,
}

const X86_64_V3_FLAGS: &[&str] = &[
    "has_sse3",
    "has_ssse3",
    "has_sse41",
    "has_sse42",
    "has_fma",
    "has_lzcnt",
    "has_popcnt",
    "has_bmi1",
    "has_bmi2",
    "has_avx",
    "has_avx2",
];

impl Target {
    pub fn name(self) -> &'static str {
        self.into()
    }

    /// Returns an ISA builder for this target, without the host's flags.
    pub fn builder(self) -> Result<isa::Builder, TargetError> {
        let (arch, flags) = match self {
            Self::X86_64V1 => ("x86_64", &[][..]),
            Self::X86_64V3 => ("x86_64", X86_64_V3_FLAGS),
            Self::Aarch64 => ("aarch64", &[][..]),
        };

        let mut builder =
            isa::lookup_by_name(arch).map_err(|source| TargetError::Lookup { source })?;

        for &flag in flags {
            builder
                .enable(flag)
                .map_err(|source| TargetError::Flag { flag, source })?;
        }

        Ok(builder)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn every_target_builds() {
        for target in Target::VARIANTS {
            assert!(target.builder().is_ok(), "{}", target.name());
        }
    }
}
