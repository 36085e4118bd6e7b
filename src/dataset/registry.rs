//! Variable and category declarations.
//!
//! The registry is the schema every later stage resolves names against:
//! ingest maps CSV columns to declared names, the column builder appends
//! derived entries, and binning/fitting look indices up here. Duplicate
//! declarations are rejected; stages after dataset construction only ever
//! hold `&VariableRegistry`.

use crate::domain::{Category, Variable};
use crate::error::AppError;

#[derive(Debug, Clone, Default)]
pub struct VariableRegistry {
    variables: Vec<Variable>,
    categories: Vec<Category>,
}

impl VariableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a continuous variable. The name must be unused and the range
    /// non-empty.
    pub fn add_variable(&mut self, var: Variable) -> Result<usize, AppError> {
        if !(var.lo < var.hi) {
            return Err(AppError::config(format!(
                "variable '{}': range [{}, {}] is empty",
                var.name, var.lo, var.hi
            )));
        }
        self.check_fresh(&var.name)?;
        self.variables.push(var);
        Ok(self.variables.len() - 1)
    }

    /// Declare a categorical variable with its finite state list.
    pub fn add_category(&mut self, cat: Category) -> Result<usize, AppError> {
        if cat.states.is_empty() {
            return Err(AppError::config(format!(
                "category '{}' declares no states",
                cat.name
            )));
        }
        for (i, s) in cat.states.iter().enumerate() {
            if cat.states[..i].contains(s) {
                return Err(AppError::config(format!(
                    "category '{}' declares state '{s}' twice",
                    cat.name
                )));
            }
        }
        self.check_fresh(&cat.name)?;
        self.categories.push(cat);
        Ok(self.categories.len() - 1)
    }

    fn check_fresh(&self, name: &str) -> Result<(), AppError> {
        if self.variable_index(name).is_some() || self.category_index(name).is_some() {
            return Err(AppError::config(format!("name '{name}' is declared twice")));
        }
        Ok(())
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn variable_index(&self, name: &str) -> Option<usize> {
        self.variables.iter().position(|v| v.name == name)
    }

    pub fn category_index(&self, name: &str) -> Option<usize> {
        self.categories.iter().position(|c| c.name == name)
    }

    /// Index of a declared variable, or a configuration error naming it.
    pub fn require_variable(&self, name: &str) -> Result<usize, AppError> {
        self.variable_index(name)
            .ok_or_else(|| AppError::config(format!("unknown variable '{name}'")))
    }

    /// Index of a declared category, or a configuration error naming it.
    pub fn require_category(&self, name: &str) -> Result<usize, AppError> {
        self.category_index(name)
            .ok_or_else(|| AppError::config(format!("unknown category '{name}'")))
    }

    /// Resolve a state name within a category.
    pub fn require_state(&self, cat_idx: usize, state: &str) -> Result<usize, AppError> {
        let cat = &self.categories[cat_idx];
        cat.states
            .iter()
            .position(|s| s == state)
            .ok_or_else(|| {
                AppError::config(format!(
                    "category '{}' has no state '{state}'",
                    cat.name
                ))
            })
    }
}
