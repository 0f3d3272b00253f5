//! Parsed strings with embedded variable references, e.g. `c++ $in -o $out`,
//! and the machinery for expanding them against variable scopes.

use crate::smallmap::SmallMap;
use std::borrow::Cow;
use std::collections::HashMap;

/// An environment providing a mapping of variable name to variable value.
/// A given EvalString may be expanded against a stack of environments,
/// first match wins.
pub trait Env {
    fn get_var(&self, var: &str) -> Option<Cow<'_, str>>;
}

/// One token within an EvalString, either literal text or a variable
/// reference.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalPart<T: AsRef<str>> {
    Literal(T),
    VarRef(T),
}

/// A parsed but unexpanded variable-reference string.  Generic so that
/// parsing can borrow from the input text (`EvalString<&str>`) while rules
/// hold owned copies for delayed expansion (`EvalString<String>`).
#[derive(Debug, Clone, PartialEq)]
pub struct EvalString<T: AsRef<str>>(Vec<EvalPart<T>>);

impl<T: AsRef<str>> EvalString<T> {
    pub fn new(parts: Vec<EvalPart<T>>) -> Self {
        EvalString(parts)
    }

    pub fn evaluate(&self, envs: &[&dyn Env]) -> String {
        let mut val = String::new();
        for part in &self.0 {
            match part {
                EvalPart::Literal(s) => val.push_str(s.as_ref()),
                EvalPart::VarRef(v) => {
                    for env in envs {
                        if let Some(v) = env.get_var(v.as_ref()) {
                            val.push_str(&v);
                            break;
                        }
                    }
                }
            }
        }
        val
    }
}

impl EvalString<&str> {
    pub fn into_owned(self) -> EvalString<String> {
        EvalString(
            self.0
                .into_iter()
                .map(|part| match part {
                    EvalPart::Literal(s) => EvalPart::Literal(s.to_owned()),
                    EvalPart::VarRef(s) => EvalPart::VarRef(s.to_owned()),
                })
                .collect(),
        )
    }
}

/// A single scope's worth of variable definitions, fully evaluated.
#[derive(Debug, Default, Clone)]
pub struct Vars(HashMap<String, String>);

impl Vars {
    pub fn insert(&mut self, key: &str, val: String) {
        self.0.insert(key.to_owned(), val);
    }
    pub fn get(&self, key: &str) -> Option<&String> {
        self.0.get(key)
    }
}

impl Env for Vars {
    fn get_var(&self, var: &str) -> Option<Cow<'_, str>> {
        self.0.get(var).map(|v| Cow::Borrowed(v.as_str()))
    }
}

// Bindings attached to a build statement, evaluated at edge creation.
impl Env for SmallMap<&str, String> {
    fn get_var(&self, var: &str) -> Option<Cow<'_, str>> {
        self.get(var).map(|v| Cow::Borrowed(v.as_str()))
    }
}
