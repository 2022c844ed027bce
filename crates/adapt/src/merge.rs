//! Update strategies for applying a payload onto an existing record.

use domain::JsonMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// How an update payload is applied to an existing `objRecord`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UpdateWay {
    Replace,
    /// Shallow key union; payload keys win.
    Merge,
    #[default]
    MergeButReplaceArrays,
    MergeButConcatArrays,
    MergeButKeepArrays,
}

/// Outcome for an upsert item whose conflict keys matched a stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OnConflict {
    Replace,
    Merge,
    MergeButReplaceArrays,
    MergeButConcatArrays,
    MergeButKeepArrays,
    Ignore,
    Fail,
}

impl OnConflict {
    /// `None` for the non-mutating outcomes.
    pub fn update_way(self) -> Option<UpdateWay> {
        match self {
            OnConflict::Replace => Some(UpdateWay::Replace),
            OnConflict::Merge => Some(UpdateWay::Merge),
            OnConflict::MergeButReplaceArrays => Some(UpdateWay::MergeButReplaceArrays),
            OnConflict::MergeButConcatArrays => Some(UpdateWay::MergeButConcatArrays),
            OnConflict::MergeButKeepArrays => Some(UpdateWay::MergeButKeepArrays),
            OnConflict::Ignore | OnConflict::Fail => None,
        }
    }
}

impl std::str::FromStr for OnConflict {
    type Err = serde_json::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(Json::String(s.to_owned()))
    }
}

#[derive(Clone, Copy)]
enum Arrays {
    Replace,
    Concat,
    Keep,
}

pub fn apply(existing: &JsonMap, update: &JsonMap, way: UpdateWay) -> JsonMap {
    match way {
        UpdateWay::Replace => update.clone(),
        UpdateWay::Merge => {
            let mut out = existing.clone();
            out.extend(update.iter().map(|(k, v)| (k.clone(), v.clone())));
            out
        }
        UpdateWay::MergeButReplaceArrays => deep(existing, update, Arrays::Replace),
        UpdateWay::MergeButConcatArrays => deep(existing, update, Arrays::Concat),
        UpdateWay::MergeButKeepArrays => deep(existing, update, Arrays::Keep),
    }
}

fn deep(existing: &JsonMap, update: &JsonMap, arrays: Arrays) -> JsonMap {
    let mut out = existing.clone();
    for (key, incoming) in update {
        let merged = match (out.get(key), incoming) {
            (Some(Json::Object(old)), Json::Object(new)) => Json::Object(deep(old, new, arrays)),
            (Some(Json::Array(old)), Json::Array(new)) => match arrays {
                Arrays::Replace => Json::Array(new.clone()),
                Arrays::Concat => Json::Array(old.iter().chain(new).cloned().collect()),
                Arrays::Keep => Json::Array(old.clone()),
            },
            _ => incoming.clone(),
        };
        out.insert(key.clone(), merged);
    }
    out
}
