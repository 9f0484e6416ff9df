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
    product_name: &'static str,
    quantity: u32,
    unit_price: f64,
}

#[derive(Debug, Serialize)]
struct Address {
    street: &'static str,
    city: &'static str,
    state: &'static str,
    postal_code: &'static str,
    country: &'static str,
}

fn generate_order() -> CreateOrderRequest {
    let mut rng = rand::thread_rng();
    let user_id = rng.gen_range(0..50_000);

    CreateOrderRequest {
        customer_id: format!("spike-{user_id}"),
        customer_email: format!("spike{user_id}@test.com"),
        items: vec![OrderItem {
            product_id: format!("prod-{}", rng.gen_range(0..50)),
            product_name: "Spike Product",
            quantity: 1,
            unit_price: 99.99,
        }],
        shipping_address: Address {
            street: "999 Spike St",
            city: "SF",
            state: "CA",
            postal_code: "94102",
            country: "USA",
        },
        payment_method: "credit_card",
        notes: "Spike test - sudden load",
    }
}

fn create_order(ctx: &mut HttpContext) -> anyhow::Result<StepOutput> {
    send(
        ctx,
        TransportRequest::post("/api/v1/orders")
            .with_json(&generate_order())?
            .with_timeout(Duration::from_secs(15)),
    )
}

fn main() -> GaleResult<()> {
    let builder = HttpScenarioDefinitionBuilder::<DefaultScenarioValues>::new_with_init(env!(
        "CARGO_PKG_NAME"
    ))?
    .with_stage("30s", 10)
    .with_stage("10s", 200)
    .with_stage("1m", 200)
    .with_stage("10s", 10)
    .with_stage("30s", 0)
    .with_threshold(HTTP_REQ_DURATION_METRIC, "p(95)<2000")
    .with_threshold(HTTP_REQ_FAILED_METRIC, "rate<0.2")
    .with_default_connection_string("http://localhost:8080")
    .with_default_summary_json("loadtest/results/spike-test-summary.json")
    .use_agent_setup(create_http_client)
    .with_step(
        StepDefinition::new("create order", create_order)
            .with_check("order created", |output| output.status() == Some(201))
            .with_check("responded in time", |output| {
                output.elapsed < Duration::from_secs(5)
            })
            .with_think_time(Duration::from_millis(300)),
    );

    std::process::exit(exit_code(&run(builder)))
}
