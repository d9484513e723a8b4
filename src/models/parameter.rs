//! Parameters: constant, time-dependent or sampled values used by rate laws
//!
//! A time-dependent parameter is evaluated once per time step. How the value
//! over a step `[t0, t1]` is chosen depends on the parameter:
//!
//! - preintegrated parameters use the exact step average `(I(t1) - I(t0)) / (t1 - t0)`
//!   where `I` is a closed-form antiderivative (expressions) or the cumulative
//!   trapezoid rule (sampled series);
//! - other parameters are evaluated at the step end point or midpoint, see
//!   [`TimeEvaluation`].

use crate::error::{Result, SmartError};
use crate::models::registry::Entity;
use crate::physics::expression::TimeExpression;
use crate::physics::units::Unit;
use serde::{Deserialize, Serialize};

/// Where a non-preintegrated time-dependent value is sampled within a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeEvaluation {
    /// Value at the end of the step (backward Euler)
    #[default]
    Endpoint,
    /// Value at the middle of the step
    Midpoint,
}

impl TimeEvaluation {
    /// Time at which the step `[t0, t1]` is sampled
    pub fn time_in(self, t0: f64, t1: f64) -> f64 {
        match self {
            Self::Endpoint => t1,
            Self::Midpoint => 0.5 * (t0 + t1),
        }
    }
}

/// The value carried by a [`Parameter`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterValue {
    /// Fixed number
    Constant(f64),

    /// Closed-form function of `t`
    Expression {
        expression: TimeExpression,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        integral: Option<TimeExpression>,
        #[serde(default)]
        preintegrate: bool,
    },

    /// Linearly interpolated time series, held constant outside its range
    Sampled {
        times: Vec<f64>,
        values: Vec<f64>,
        #[serde(default)]
        preintegrate: bool,
    },
}

impl ParameterValue {
    fn validate(self, name: &str) -> Result<Self> {
        match self {
            ParameterValue::Constant(value) if !value.is_finite() => Err(SmartError::configuration(format!(
                "parameter '{}' has non-finite value {}",
                name, value
            ))),
            ParameterValue::Expression { expression, integral: None, preintegrate: true } => {
                let integral = expression.integrate()?;
                Ok(ParameterValue::Expression {
                    expression,
                    integral: Some(integral),
                    preintegrate: true,
                })
            }
            ParameterValue::Sampled { times, values, preintegrate } => {
                if times.is_empty() || times.len() != values.len() {
                    return Err(SmartError::configuration(format!(
                        "sampled parameter '{}' needs matching non-empty time and value series ({} times, {} values)",
                        name,
                        times.len(),
                        values.len()
                    )));
                }
                if times.iter().chain(values.iter()).any(|v| !v.is_finite()) {
                    return Err(SmartError::configuration(format!(
                        "sampled parameter '{}' contains non-finite samples",
                        name
                    )));
                }
                if times.windows(2).any(|w| w[1] <= w[0]) {
                    return Err(SmartError::configuration(format!(
                        "sample times of parameter '{}' must be strictly increasing",
                        name
                    )));
                }
                Ok(ParameterValue::Sampled { times, values, preintegrate })
            }
            other => Ok(other),
        }
    }
}

/// Named model parameter with a unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ParameterRecord")]
pub struct Parameter {
    name: String,
    unit: Unit,
    value: ParameterValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    group: Option<String>,
}

#[derive(Deserialize)]
struct ParameterRecord {
    name: String,
    unit: Unit,
    value: ParameterValue,
    #[serde(default)]
    notes: Option<String>,
    #[serde(default)]
    group: Option<String>,
}

impl TryFrom<ParameterRecord> for Parameter {
    type Error = SmartError;

    fn try_from(r: ParameterRecord) -> Result<Self> {
        let mut parameter = Parameter::from_value(r.name, r.value, r.unit)?;
        parameter.notes = r.notes;
        parameter.group = r.group;
        Ok(parameter)
    }
}

impl Parameter {
    /// Validated parameter from any [`ParameterValue`]
    ///
    /// An expression with `preintegrate` set and no integral gets its
    /// antiderivative derived here; construction fails if none exists.
    pub fn from_value(name: impl Into<String>, value: ParameterValue, unit: Unit) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(SmartError::configuration("parameter name must not be empty"));
        }
        let value = value.validate(&name)?;
        Ok(Self {
            name,
            unit,
            value,
            notes: None,
            group: None,
        })
    }

    /// Constant parameter
    ///
    /// ```rust
    /// use smart_rs::models::Parameter;
    ///
    /// let kon = Parameter::constant("kon", 1.0, "1/(uM*s)").unwrap();
    /// assert_eq!(kon.value_at(3.0), 1.0);
    /// ```
    pub fn constant(name: impl Into<String>, value: f64, unit: &str) -> Result<Self> {
        Self::from_value(name, ParameterValue::Constant(value), Unit::parse(unit)?)
    }

    /// Parameter given by an expression in `t`
    pub fn from_expression(name: impl Into<String>, expression: &str, unit: &str, preintegrate: bool) -> Result<Self> {
        Self::from_value(
            name,
            ParameterValue::Expression {
                expression: TimeExpression::parse(expression)?,
                integral: None,
                preintegrate,
            },
            Unit::parse(unit)?,
        )
    }

    /// Preintegrated parameter with a user supplied antiderivative
    pub fn from_expression_with_integral(
        name: impl Into<String>,
        expression: &str,
        integral: &str,
        unit: &str,
    ) -> Result<Self> {
        Self::from_value(
            name,
            ParameterValue::Expression {
                expression: TimeExpression::parse(expression)?,
                integral: Some(TimeExpression::parse(integral)?),
                preintegrate: true,
            },
            Unit::parse(unit)?,
        )
    }

    /// Parameter interpolated from samples `(times[i], values[i])`
    pub fn sampled(
        name: impl Into<String>,
        times: Vec<f64>,
        values: Vec<f64>,
        unit: &str,
        preintegrate: bool,
    ) -> Result<Self> {
        Self::from_value(name, ParameterValue::Sampled { times, values, preintegrate }, Unit::parse(unit)?)
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unit(&self) -> &Unit {
        &self.unit
    }

    pub fn value(&self) -> &ParameterValue {
        &self.value
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    pub fn is_time_dependent(&self) -> bool {
        !matches!(self.value, ParameterValue::Constant(_))
    }

    pub fn is_preintegrated(&self) -> bool {
        match &self.value {
            ParameterValue::Constant(_) => false,
            ParameterValue::Expression { preintegrate, .. } | ParameterValue::Sampled { preintegrate, .. } => {
                *preintegrate
            }
        }
    }

    /// Instantaneous value at time `t`
    pub fn value_at(&self, t: f64) -> f64 {
        match &self.value {
            ParameterValue::Constant(value) => *value,
            ParameterValue::Expression { expression, .. } => expression.evaluate(t),
            ParameterValue::Sampled { times, values, .. } => interpolate(times, values, t),
        }
    }

    /// Antiderivative at `t`, for preintegrated parameters
    pub fn integral_at(&self, t: f64) -> Option<f64> {
        match &self.value {
            ParameterValue::Expression { integral: Some(integral), preintegrate: true, .. } => {
                Some(integral.evaluate(t))
            }
            ParameterValue::Sampled { times, values, preintegrate: true } => Some(cumulative_trapezoid(times, values, t)),
            _ => None,
        }
    }

    /// Value used for the step `[t0, t1]`
    pub fn value_over(&self, t0: f64, t1: f64, mode: TimeEvaluation) -> f64 {
        if t1 > t0 {
            if let (Some(i0), Some(i1)) = (self.integral_at(t0), self.integral_at(t1)) {
                return (i1 - i0) / (t1 - t0);
            }
        }
        self.value_at(mode.time_in(t0, t1))
    }
}

impl Entity for Parameter {
    const KIND: &'static str = "parameter";

    fn name(&self) -> &str {
        &self.name
    }
}

fn interpolate(times: &[f64], values: &[f64], t: f64) -> f64 {
    let last = times.len() - 1;
    if t <= times[0] {
        return values[0];
    }
    if t >= times[last] {
        return values[last];
    }
    let k = times.partition_point(|&ti| ti <= t) - 1;
    let w = (t - times[k]) / (times[k + 1] - times[k]);
    values[k] + w * (values[k + 1] - values[k])
}

/// Integral of the interpolant from `times[0]` to `t`
fn cumulative_trapezoid(times: &[f64], values: &[f64], t: f64) -> f64 {
    let last = times.len() - 1;
    if t <= times[0] {
        // constant extrapolation below the first sample
        return values[0] * (t - times[0]);
    }

    let mut total = 0.0;
    for k in 0..last {
        let (a, b) = (times[k], times[k + 1]);
        if t <= b {
            let v = interpolate(times, values, t);
            return total + 0.5 * (values[k] + v) * (t - a);
        }
        total += 0.5 * (values[k] + values[k + 1]) * (b - a);
    }
    total + values[last] * (t - times[last])
}
