//! Model formulas for shape regressions.

use crate::error::{GmError, Result};
use serde::{Deserialize, Serialize};

/// A term in a formula.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Term {
    /// Main effect of a variable.
    Main(String),
    /// Interaction between two variables.
    Interaction(String, String),
}

impl Term {
    /// Get the variable names involved in this term.
    pub fn variables(&self) -> Vec<&str> {
        match self {
            Term::Main(v) => vec![v.as_str()],
            Term::Interaction(v1, v2) => vec![v1.as_str(), v2.as_str()],
        }
    }
}

impl std::fmt::Display for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Term::Main(v) => write!(f, "{}", v),
            Term::Interaction(v1, v2) => write!(f, "{}:{}", v1, v2),
        }
    }
}

/// A parsed right-hand side of a shape model.
///
/// Supports R-style syntax:
/// - `~ 1` - intercept only (mean shape)
/// - `~ log_csize` - intercept + size
/// - `~ log_csize + gear` - sequential terms
/// - `~ log_csize * species` - main effects + interaction
/// - `~ 0 + species` - no intercept
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Formula {
    /// Whether to include an intercept.
    pub intercept: bool,
    /// Terms in the formula, in sequential order.
    pub terms: Vec<Term>,
    /// Original formula string.
    pub formula_str: String,
}

impl Formula {
    /// Parse a formula string.
    ///
    /// # Examples
    /// ```
    /// use composable_gm::data::Formula;
    /// let f = Formula::parse("~ log_csize * species").unwrap();
    /// assert!(f.intercept);
    /// assert_eq!(f.terms.len(), 3);
    /// ```
    pub fn parse(formula: &str) -> Result<Self> {
        let formula_str = formula.to_string();
        let rhs = formula
            .trim()
            .strip_prefix('~')
            .ok_or_else(|| GmError::FormulaParse("Formula must start with '~'".to_string()))?
            .trim();

        if rhs.is_empty() {
            return Err(GmError::FormulaParse(
                "Formula right-hand side is empty".to_string(),
            ));
        }

        let mut intercept = true;
        let mut terms: Vec<Term> = Vec::new();
        for piece in rhs.split('+').map(str::trim) {
            match piece {
                "" => {
                    return Err(GmError::FormulaParse(format!(
                        "Empty term in formula '{}'",
                        formula_str
                    )))
                }
                "1" => {}
                "0" | "-1" => intercept = false,
                _ => {
                    for term in parse_term(piece)? {
                        if !terms.contains(&term) {
                            terms.push(term);
                        }
                    }
                }
            }
        }

        if terms.is_empty() && !intercept {
            return Err(GmError::FormulaParse(
                "Formula must have at least one term".to_string(),
            ));
        }

        Ok(Self {
            intercept,
            terms,
            formula_str,
        })
    }

    /// Get all variable names used in the formula.
    pub fn variables(&self) -> Vec<&str> {
        let mut vars: Vec<&str> = self
            .terms
            .iter()
            .flat_map(|t| t.variables())
            .collect();
        vars.sort();
        vars.dedup();
        vars
    }
}

fn parse_term(piece: &str) -> Result<Vec<Term>> {
    let split = |sep: char| -> Result<(String, String)> {
        let parts: Vec<&str> = piece.split(sep).map(str::trim).collect();
        if parts.len() != 2 || parts.iter().any(|p| p.is_empty()) {
            return Err(GmError::FormulaParse(format!(
                "Invalid interaction term: {}",
                piece
            )));
        }
        Ok((parts[0].to_string(), parts[1].to_string()))
    };

    if piece.contains('*') {
        let (a, b) = split('*')?;
        Ok(vec![
            Term::Main(a.clone()),
            Term::Main(b.clone()),
            Term::Interaction(a, b),
        ])
    } else if piece.contains(':') {
        let (a, b) = split(':')?;
        Ok(vec![Term::Interaction(a, b)])
    } else {
        Ok(vec![Term::Main(piece.to_string())])
    }
}

impl std::fmt::Display for Formula {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "~ ")?;
        if !self.intercept {
            write!(f, "0 + ")?;
        }
        if self.terms.is_empty() {
            return write!(f, "1");
        }
        let term_strs: Vec<String> = self.terms.iter().map(|t| t.to_string()).collect();
        write!(f, "{}", term_strs.join(" + "))
    }
}
