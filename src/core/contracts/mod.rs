//! Wire contracts shared with the native driver bridge and the frontend.

mod ingress_v1;

pub use ingress_v1::{
    CanonicalNativeSampleV1, LegacyNativeSampleV1, NativeSampleWire, PointerKind,
    PointerSampleV1,
};
