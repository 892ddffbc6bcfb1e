// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Typed preference keys and values
//!
//! A preference value is a tagged variant, so a stored entry always carries
//! its own type. [`PreferenceKey<T>`] pins the expected type at compile time;
//! reading a key whose stored variant differs yields `None` instead of a cast.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::marker::PhantomData;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PreferenceValue {
    Bool(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    String(String),
    StringSet(BTreeSet<String>),
}

impl PreferenceValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            PreferenceValue::Bool(_) => "bool",
            PreferenceValue::Int(_) => "int",
            PreferenceValue::Long(_) => "long",
            PreferenceValue::Float(_) => "float",
            PreferenceValue::String(_) => "string",
            PreferenceValue::StringSet(_) => "string_set",
        }
    }
}

/// Rust types that map onto exactly one [`PreferenceValue`] variant
pub trait PreferenceType: Sized {
    fn into_value(self) -> PreferenceValue;
    fn from_value(value: &PreferenceValue) -> Option<Self>;
}

macro_rules! preference_type {
    ($ty:ty, $variant:ident) => {
        impl PreferenceType for $ty {
            fn into_value(self) -> PreferenceValue {
                PreferenceValue::$variant(self)
            }

            fn from_value(value: &PreferenceValue) -> Option<Self> {
                match value {
                    PreferenceValue::$variant(v) => Some(v.clone()),
                    _ => None,
                }
            }
        }
    };
}

preference_type!(bool, Bool);
preference_type!(i32, Int);
preference_type!(i64, Long);
preference_type!(f32, Float);
preference_type!(String, String);
preference_type!(BTreeSet<String>, StringSet);

/// A preference name bound to the type stored under it
#[derive(Debug)]
pub struct PreferenceKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> PreferenceKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for PreferenceKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for PreferenceKey<T> {}

#[cfg(test)]
mod tests {
    use super::*;

    const OPT_OUT: PreferenceKey<bool> = PreferenceKey::new("opt_out");

    #[test]
    fn test_typed_conversion() {
        let value = true.into_value();
        assert_eq!(value, PreferenceValue::Bool(true));
        assert_eq!(bool::from_value(&value), Some(true));
        assert_eq!(i64::from_value(&value), None);
        assert_eq!(OPT_OUT.name(), "opt_out");
    }

    #[test]
    fn test_string_set_round_trip() {
        let set: BTreeSet<String> = ["a", "b"].iter().map(|s| s.to_string()).collect();
        let value = set.clone().into_value();
        assert_eq!(value.type_name(), "string_set");
        assert_eq!(BTreeSet::<String>::from_value(&value), Some(set));
    }
}
