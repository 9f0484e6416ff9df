use std::time::Duration;

use gale_http_client::prelude::*;
use rand::Rng;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct CreateOrderRequest {
    customer_id: String,
    customer_email: String,
    items: Vec<OrderItem>,
    shipping_address: Address,
    payment_method: &'static str,
    notes: &'static str,
}

#[derive(Debug, Serialize)]
struct OrderItem {
    product_id: String,
    product_name: String,
    quantity: u32,
    unit_price: f64,
}

#[derive(Debug, Serialize)]
struct Address {
    street: String,
    city: &'static str,
    state: &'static str,
    postal_code: &'static str,
    country: &'static str,
}

fn generate_order() -> CreateOrderRequest {
    let mut rng = rand::thread_rng();
    let user_id = rng.gen_range(0..100_000);

    CreateOrderRequest {
        customer_id: format!("stress-{user_id}"),
        customer_email: format!("stress{user_id}@test.com"),
        items: vec![OrderItem {
            product_id: format!("prod-{}", rng.gen_range(0..100)),
            product_name: format!("Product {}", rng.gen_range(0..100)),
            quantity: rng.gen_range(1..=5),
            unit_price: rng.gen_range(10..1010) as f64,
        }],
        shipping_address: Address {
            street: format!("{} Stress St", rng.gen_range(0..999)),
            city: "San Francisco",
            state: "CA",
            postal_code: "94102",
            country: "USA",
        },
        payment_method: "credit_card",
        notes: "Stress test order",
    }
}

fn create_order(ctx: &mut HttpContext) -> anyhow::Result<StepOutput> {
    send(
        ctx,
        TransportRequest::post("/api/v1/orders")
            .with_json(&generate_order())?
            .with_timeout(Duration::from_secs(10)),
    )
}

fn main() -> GaleResult<()> {
    let builder = HttpScenarioDefinitionBuilder::<DefaultScenarioValues>::new_with_init(env!(
        "CARGO_PKG_NAME"
    ))?
    .with_stage("1m", 50)
    .with_stage("2m", 100)
    .with_stage("2m", 200)
    .with_stage("2m", 300)
    .with_stage("2m", 400)
    .with_stage("1m", 0)
    .with_threshold(HTTP_REQ_DURATION_METRIC, "p(95)<1000")
    .with_threshold(HTTP_REQ_FAILED_METRIC, "rate<0.1")
    .with_default_connection_string("http://localhost:8080")
    .with_default_summary_json("loadtest/results/stress-test-summary.json")
    .use_agent_setup(create_http_client)
    .with_step(
        StepDefinition::new("create order", create_order)
            .with_check("order created", |output| output.status() == Some(201))
            .with_check("response time acceptable", |output| {
                output.elapsed < Duration::from_secs(2)
            })
            .with_failure_rate("errors")
            .with_think_time(Duration::from_millis(500)),
    );

    std::process::exit(exit_code(&run(builder)))
}
