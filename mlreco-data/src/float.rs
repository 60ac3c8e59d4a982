//! Serde support for floating point data that may hold NaN or infinities.
//!
//! JSON has no literal for non-finite numbers and `serde_json` writes them as
//! `null`. Floats are written as plain numbers when finite and as the strings
//! `"NaN"`, `"inf"` and `"-inf"` otherwise. Arrays keep the `{v, dim, data}`
//! layout of `ndarray`'s own serde support.

use std::fmt;
use std::marker::PhantomData;

use ndarray::{ArrayD, IxDyn};
use serde::de::{self, Deserializer, Visitor};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

const NAN: &str = "NaN";
const INFINITY: &str = "inf";
const NEG_INFINITY: &str = "-inf";

pub(crate) trait Float: Copy + Serialize {
    fn from_f64(value: f64) -> Self;
    fn to_f64(self) -> f64;
}

impl Float for f32 {
    fn from_f64(value: f64) -> Self {
        value as f32
    }

    fn to_f64(self) -> f64 {
        f64::from(self)
    }
}

impl Float for f64 {
    fn from_f64(value: f64) -> Self {
        value
    }

    fn to_f64(self) -> f64 {
        self
    }
}

fn special_name(value: f64) -> Option<&'static str> {
    if value.is_nan() {
        Some(NAN)
    } else if value == f64::INFINITY {
        Some(INFINITY)
    } else if value == f64::NEG_INFINITY {
        Some(NEG_INFINITY)
    } else {
        None
    }
}

/// A float that survives a JSON round trip.
struct Lossless<T>(T);

impl<T: Float> Serialize for Lossless<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match special_name(self.0.to_f64()) {
            Some(name) => serializer.serialize_str(name),
            None => self.0.serialize(serializer),
        }
    }
}

struct FloatVisitor<T>(PhantomData<T>);

impl<T: Float> Visitor<'_> for FloatVisitor<T> {
    type Value = T;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a number, \"NaN\", \"inf\" or \"-inf\"")
    }

    fn visit_f64<E: de::Error>(self, value: f64) -> Result<T, E> {
        Ok(T::from_f64(value))
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<T, E> {
        Ok(T::from_f64(value as f64))
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<T, E> {
        Ok(T::from_f64(value as f64))
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<T, E> {
        match value {
            NAN => Ok(T::from_f64(f64::NAN)),
            INFINITY => Ok(T::from_f64(f64::INFINITY)),
            NEG_INFINITY => Ok(T::from_f64(f64::NEG_INFINITY)),
            other => Err(E::invalid_value(de::Unexpected::Str(other), &self)),
        }
    }
}

impl<'de, T: Float> Deserialize<'de> for Lossless<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer
            .deserialize_any(FloatVisitor(PhantomData))
            .map(Lossless)
    }
}

/// `#[serde(with)]` adapter for a single float.
pub(crate) mod scalar {
    use super::*;

    pub(crate) fn serialize<T: Float, S: Serializer>(
        value: &T,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        Lossless(*value).serialize(serializer)
    }

    pub(crate) fn deserialize<'de, T: Float, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<T, D::Error> {
        Lossless::<T>::deserialize(deserializer).map(|value| value.0)
    }
}

/// `#[serde(with)]` adapter for a float array.
pub(crate) mod array {
    use super::*;

    struct Elements<'a, T>(&'a ArrayD<T>);

    impl<T: Float> Serialize for Elements<'_, T> {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            serializer.collect_seq(self.0.iter().map(|&value| Lossless(value)))
        }
    }

    #[derive(Deserialize)]
    #[serde(bound(deserialize = "T: Float"))]
    struct Stored<T> {
        dim: Vec<usize>,
        data: Vec<Lossless<T>>,
    }

    pub(crate) fn serialize<T: Float, S: Serializer>(
        array: &ArrayD<T>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Array", 3)?;
        state.serialize_field("v", &1u8)?;
        state.serialize_field("dim", array.shape())?;
        state.serialize_field("data", &Elements(array))?;
        state.end()
    }

    pub(crate) fn deserialize<'de, T: Float, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<ArrayD<T>, D::Error> {
        let stored = Stored::<T>::deserialize(deserializer)?;
        let data = stored.data.into_iter().map(|value| value.0).collect();
        ArrayD::from_shape_vec(IxDyn(&stored.dim), data).map_err(de::Error::custom)
    }
}
