use tabled::Tabled;

#[derive(Tabled)]
pub struct TrendRow {
    #[tabled(rename = "Metric")]
    pub name: String,
    #[tabled(display = "float2")]
    pub avg: f64,
    #[tabled(display = "float2")]
    pub min: f64,
    #[tabled(display = "float2")]
    pub med: f64,
    #[tabled(display = "float2")]
    pub max: f64,
    #[tabled(rename = "p(90)", display = "float2")]
    pub p90: f64,
    #[tabled(rename = "p(95)", display = "float2")]
    pub p95: f64,
    #[tabled(rename = "p(99)", display = "float2")]
    pub p99: f64,
    pub count: u64,
}

#[derive(Tabled)]
pub struct RateRow {
    #[tabled(rename = "Metric")]
    pub name: String,
    #[tabled(rename = "Rate", display = "percent")]
    pub rate: f64,
    #[tabled(rename = "✓")]
    pub passes: u64,
    #[tabled(rename = "✗")]
    pub fails: u64,
}

#[derive(Tabled)]
pub struct CounterRow {
    #[tabled(rename = "Metric")]
    pub name: String,
    #[tabled(rename = "Count")]
    pub count: u64,
    #[tabled(rename = "Per second", display = "float2")]
    pub rate: f64,
}

#[derive(Tabled)]
pub struct ThresholdRow {
    #[tabled(rename = "Metric")]
    pub metric: String,
    #[tabled(rename = "Threshold")]
    pub expression: String,
    #[tabled(rename = "Status")]
    pub status: String,
    #[tabled(rename = "Observed")]
    pub observed: String,
    #[tabled(rename = "Reason")]
    pub reason: String,
}

fn float2(n: &f64) -> String {
    format!("{:.2}", n)
}

fn percent(n: &f64) -> String {
    format!("{:.2}%", n * 100.0)
}
