//! Scalar Cell Family
//!
//! Leaf cells holding one value each. All of them share the backup/value
//! change-tracking core in [`value`]; the submodules contribute payload
//! types, wire shapes, and index buckets.
//!
//! The family, by alias:
//!
//! | Handle | Payload | Wire shape |
//! |---|---|---|
//! | `RxBoolean` | `bool` | JSON bool |
//! | `RxInt32` | `i32` | JSON number |
//! | `RxInt64` | `i64` | JSON **string** |
//! | `RxDouble` | `f64` | JSON number |
//! | `RxString` | `String` | JSON string |
//! | `RxFastString` | `FastStr` | JSON string |
//! | `RxDate` | `NaiveDate` | `"YYYY-MM-DD"` |
//! | `RxTime` | `NaiveTime` | `"HH:MM:SS"` |
//! | `RxDateTime` | `DateTime<FixedOffset>` | RFC 3339 |
//! | `RxPrincipal` | `Principal` | `{"agent","authority"}` |
//! | `RxComplex` | `Complex` | `{"r","i"}` |
//! | `RxVector3` | `Vector3` | `[x,y,z]` |
//! | `RxMatrix2`/`RxMatrix3` | row-major | nested arrays |
//! | `RxAsset` | `AssetRef` | object |
//! | `RxJson` | `serde_json::Value` | verbatim |
//!
//! `RxEnum` is the one member with its own slot type (it carries a repair
//! function).

pub mod value;
pub mod primitive;
pub mod text;
pub mod temporal;
pub mod identity;
pub mod geometry;
pub mod misc;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime};

pub use identity::Principal;
pub use geometry::{Complex, Matrix2, Matrix3, Vector3};
pub use misc::{AssetRef, EnumSlot, RxEnum};
pub use text::{stable_hash32, FastStr};
pub use value::{RxHandle, RxValue, ScalarSlot, ScalarValue, ValueState};

pub type RxBoolean = RxValue<bool>;
pub type RxInt32 = RxValue<i32>;
pub type RxInt64 = RxValue<i64>;
pub type RxDouble = RxValue<f64>;
pub type RxString = RxValue<String>;
pub type RxFastString = RxValue<FastStr>;
pub type RxDate = RxValue<NaiveDate>;
pub type RxTime = RxValue<NaiveTime>;
pub type RxDateTime = RxValue<DateTime<FixedOffset>>;
pub type RxPrincipal = RxValue<Principal>;
pub type RxComplex = RxValue<Complex>;
pub type RxVector3 = RxValue<Vector3>;
pub type RxMatrix2 = RxValue<Matrix2>;
pub type RxMatrix3 = RxValue<Matrix3>;
pub type RxAsset = RxValue<AssetRef>;
pub type RxJson = RxValue<serde_json::Value>;
