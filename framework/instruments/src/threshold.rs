use std::fmt::{Display, Formatter};
use std::str::FromStr;

use gale_summary_model::{ThresholdStatus, ThresholdVerdict};

use crate::metrics::MetricKind;
use crate::snapshot::{MetricSnapshot, MetricsSnapshot};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ThresholdParseError {
    #[error("threshold expression is empty")]
    Empty,
    #[error("unknown aggregation `{0}`, expected one of count, rate, avg, min, max, med or p(N)")]
    UnknownAggregation(String),
    #[error("invalid percentile `{0}`, expected a number greater than 0 and at most 100")]
    InvalidPercentile(String),
    #[error("missing comparison in `{0}`, expected one of <, <=, >, >=, == or !=")]
    MissingComparison(String),
    #[error("invalid threshold value `{0}`")]
    InvalidValue(String),
}

/// How a metric is reduced to a single number before it is compared.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregation {
    Count,
    Rate,
    Avg,
    Min,
    Max,
    Med,
    Percentile(f64),
}

impl Aggregation {
    fn applies_to(&self, kind: MetricKind) -> bool {
        match self {
            Aggregation::Count => true,
            Aggregation::Rate => kind == MetricKind::Rate,
            Aggregation::Avg
            | Aggregation::Min
            | Aggregation::Max
            | Aggregation::Med
            | Aggregation::Percentile(_) => kind == MetricKind::Trend,
        }
    }

    /// Reduce the metric, or `None` if it has no samples to reduce.
    fn observe(&self, metric: &MetricSnapshot) -> Option<f64> {
        match (self, metric) {
            (Aggregation::Count, MetricSnapshot::Counter(count)) => Some(*count as f64),
            (_, MetricSnapshot::Counter(_)) => None,
            (_, metric) if metric.count() == 0 => None,
            (Aggregation::Count, metric) => Some(metric.count() as f64),
            (Aggregation::Rate, MetricSnapshot::Rate(rate)) => Some(rate.rate()),
            (_, MetricSnapshot::Trend(trend)) => Some(match self {
                Aggregation::Avg => trend.avg(),
                Aggregation::Min => trend.min,
                Aggregation::Max => trend.max,
                Aggregation::Med => trend.med(),
                Aggregation::Percentile(p) => trend.percentile(*p),
                Aggregation::Count | Aggregation::Rate => return None,
            }),
            _ => None,
        }
    }
}

impl Display for Aggregation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Aggregation::Count => write!(f, "count"),
            Aggregation::Rate => write!(f, "rate"),
            Aggregation::Avg => write!(f, "avg"),
            Aggregation::Min => write!(f, "min"),
            Aggregation::Max => write!(f, "max"),
            Aggregation::Med => write!(f, "med"),
            Aggregation::Percentile(p) => write!(f, "p({p})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Comparison {
    // Two character operators first so that `<=` is not read as `<`.
    const OPERATORS: [(&'static str, Comparison); 6] = [
        ("<=", Comparison::Le),
        (">=", Comparison::Ge),
        ("==", Comparison::Eq),
        ("!=", Comparison::Ne),
        ("<", Comparison::Lt),
        (">", Comparison::Gt),
    ];

    pub fn holds(&self, observed: f64, value: f64) -> bool {
        match self {
            Comparison::Lt => observed < value,
            Comparison::Le => observed <= value,
            Comparison::Gt => observed > value,
            Comparison::Ge => observed >= value,
            Comparison::Eq => observed == value,
            Comparison::Ne => observed != value,
        }
    }
}

impl Display for Comparison {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let op = Self::OPERATORS
            .iter()
            .find(|(_, c)| c == self)
            .map(|(op, _)| *op)
            .unwrap_or("?");
        write!(f, "{op}")
    }
}

/// A parsed threshold expression such as `p(95)<500` or `rate < 0.05`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdExpression {
    pub aggregation: Aggregation,
    pub comparison: Comparison,
    pub value: f64,
}

impl FromStr for ThresholdExpression {
    type Err = ThresholdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let compact: String = s.chars().filter(|c| !c.is_whitespace()).collect();
        if compact.is_empty() {
            return Err(ThresholdParseError::Empty);
        }

        let (position, op, comparison) = Comparison::OPERATORS
            .iter()
            .filter_map(|(op, comparison)| compact.find(op).map(|pos| (pos, *op, *comparison)))
            .min_by_key(|(pos, op, _)| (*pos, std::cmp::Reverse(op.len())))
            .ok_or_else(|| ThresholdParseError::MissingComparison(s.to_string()))?;

        let aggregation = parse_aggregation(&compact[..position])?;

        let literal = &compact[position + op.len()..];
        let value = literal
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| ThresholdParseError::InvalidValue(literal.to_string()))?;

        Ok(ThresholdExpression {
            aggregation,
            comparison,
            value,
        })
    }
}

fn parse_aggregation(input: &str) -> Result<Aggregation, ThresholdParseError> {
    match input {
        "count" => Ok(Aggregation::Count),
        "rate" => Ok(Aggregation::Rate),
        "avg" => Ok(Aggregation::Avg),
        "min" => Ok(Aggregation::Min),
        "max" => Ok(Aggregation::Max),
        "med" => Ok(Aggregation::Med),
        other => {
            let inner = other
                .strip_prefix("p(")
                .and_then(|rest| rest.strip_suffix(')'))
                .ok_or_else(|| ThresholdParseError::UnknownAggregation(other.to_string()))?;

            inner
                .parse::<f64>()
                .ok()
                .filter(|p| *p > 0.0 && *p <= 100.0)
                .map(Aggregation::Percentile)
                .ok_or_else(|| ThresholdParseError::InvalidPercentile(inner.to_string()))
        }
    }
}

/// A pass/fail condition over one metric.
#[derive(Debug, Clone, PartialEq)]
pub struct Threshold {
    metric: String,
    source: String,
    expression: ThresholdExpression,
}

impl Threshold {
    /// Parse `expression` and attach it to `metric`.
    pub fn new(
        metric: impl Into<String>,
        expression: impl Into<String>,
    ) -> Result<Self, ThresholdParseError> {
        let source = expression.into();
        let parsed = source.parse()?;
        Ok(Self {
            metric: metric.into(),
            source: source.trim().to_string(),
            expression: parsed,
        })
    }

    pub fn metric(&self) -> &str {
        &self.metric
    }

    /// The expression as it was written.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn expression(&self) -> &ThresholdExpression {
        &self.expression
    }

    /// Check this threshold against the current value of its metric.
    ///
    /// A metric that was never recorded, or a rate or trend with no samples, gives
    /// [ThresholdStatus::NoData]. An aggregation that does not apply to the metric's kind is a
    /// failure.
    pub fn evaluate(&self, snapshot: &MetricsSnapshot) -> ThresholdVerdict {
        let verdict = |status, observed, reason| ThresholdVerdict {
            metric: self.metric.clone(),
            expression: self.source.clone(),
            status,
            observed,
            reason,
        };

        let Some(metric) = snapshot.get(&self.metric) else {
            return verdict(
                ThresholdStatus::NoData,
                None,
                Some(format!("metric `{}` was never recorded", self.metric)),
            );
        };

        let ThresholdExpression {
            aggregation,
            comparison,
            value,
        } = self.expression;

        if !aggregation.applies_to(metric.kind()) {
            return verdict(
                ThresholdStatus::Fail,
                None,
                Some(format!(
                    "`{aggregation}` does not apply to {} metric `{}`",
                    metric.kind(),
                    self.metric
                )),
            );
        }

        match aggregation.observe(metric) {
            None => verdict(
                ThresholdStatus::NoData,
                None,
                Some(format!("metric `{}` has no samples", self.metric)),
            ),
            Some(observed) if comparison.holds(observed, value) => {
                verdict(ThresholdStatus::Pass, Some(observed), None)
            }
            Some(observed) => verdict(
                ThresholdStatus::Fail,
                Some(observed),
                Some(format!(
                    "{aggregation} was {observed}, expected {comparison} {value}"
                )),
            ),
        }
    }
}

/// Evaluate every threshold against the snapshot, keeping the order they were given in.
pub fn evaluate_thresholds(
    snapshot: &MetricsSnapshot,
    thresholds: &[Threshold],
) -> Vec<ThresholdVerdict> {
    thresholds
        .iter()
        .map(|threshold| threshold.evaluate(snapshot))
        .collect()
}
