use std::time::Duration;

use gale_http_client::prelude::*;
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Default)]
struct ScenarioValues {
    /// The order created in the current iteration, if every create check passed
    order_id: Option<String>,
}

impl UserValuesConstraint for ScenarioValues {}

#[derive(Debug, Serialize)]
struct CreateOrderRequest {
    customer_id: String,
    customer_email: String,
    items: Vec<OrderItem>,
    shipping_address: Address,
    payment_method: &'static str,
    notes: String,
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

#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct OrderListResponse {
    total: u64,
}

fn generate_order() -> CreateOrderRequest {
    let mut rng = rand::thread_rng();
    let user_id = rng.gen_range(0..10_000);

    CreateOrderRequest {
        customer_id: format!("load-test-{user_id}"),
        customer_email: format!("user{user_id}@loadtest.com"),
        items: vec![OrderItem {
            product_id: format!("prod-{}", rng.gen_range(0..100)),
            product_name: format!("Product {}", rng.gen_range(0..100)),
            quantity: rng.gen_range(1..=5),
            unit_price: rng.gen_range(10..1010) as f64,
        }],
        shipping_address: Address {
            street: format!("{} Main St", rng.gen_range(0..999)),
            city: "San Francisco",
            state: "CA",
            postal_code: "94102",
            country: "USA",
        },
        payment_method: "credit_card",
        notes: format!("Load test order from user {user_id}"),
    }
}

fn health(ctx: &mut HttpContext<ScenarioValues>) -> anyhow::Result<StepOutput> {
    get(ctx, "/health")
}

const ORDER_THINK_TIME: Duration = Duration::from_secs(1);

fn order_created(output: &StepOutput) -> bool {
    output.status() == Some(201)
}

fn order_has_id(output: &StepOutput) -> bool {
    output
        .json::<OrderResponse>()
        .is_some_and(|order| order.id.starts_with("ORD-"))
}

fn created_quickly(output: &StepOutput) -> bool {
    output.elapsed < Duration::from_millis(200)
}

/// Create an order. It is fetched next only if every create check passes, otherwise the think
/// time that follows the fetch is taken here.
fn create_order(ctx: &mut HttpContext<ScenarioValues>) -> anyhow::Result<StepOutput> {
    ctx.get_mut().scenario_values.order_id = None;

    let output = post_json(ctx, "/api/v1/orders", &generate_order())?;
    if order_created(&output) && order_has_id(&output) && created_quickly(&output) {
        ctx.get_mut().scenario_values.order_id =
            output.json::<OrderResponse>().map(|order| order.id);
    } else {
        ctx.pause(ORDER_THINK_TIME);
    }

    Ok(output)
}

fn get_order(ctx: &mut HttpContext<ScenarioValues>) -> anyhow::Result<StepOutput> {
    let Some(order_id) = ctx.get().scenario_values.order_id.clone() else {
        return Ok(StepOutput::failure(Duration::ZERO, "no order to fetch"));
    };

    let output = get(ctx, &format!("/api/v1/orders/{order_id}"))?;

    let matches = output
        .json::<OrderResponse>()
        .is_some_and(|order| order.id == order_id);
    ctx.record_check("order data matches", matches)?;

    Ok(output)
}

fn list_orders(ctx: &mut HttpContext<ScenarioValues>) -> anyhow::Result<StepOutput> {
    get(ctx, "/api/v1/orders?page=1&limit=10")
}

fn main() -> GaleResult<()> {
    let builder = HttpScenarioDefinitionBuilder::<ScenarioValues>::new_with_init(env!(
        "CARGO_PKG_NAME"
    ))?
    .with_stage("30s", 20)
    .with_stage("1m", 50)
    .with_stage("2m", 50)
    .with_stage("30s", 0)
    .with_threshold(HTTP_REQ_DURATION_METRIC, "p(95)<500")
    .with_threshold(HTTP_REQ_FAILED_METRIC, "rate<0.05")
    .with_threshold("errors", "rate<0.1")
    .with_default_connection_string("http://localhost:8080")
    .with_default_summary_json("loadtest/results/basic-load-summary.json")
    .use_agent_setup(create_http_client)
    .with_step(
        StepDefinition::new("health", health)
            .with_check("health check status is 200", |output| {
                output.status() == Some(200)
            })
            .with_failure_rate("errors")
            .with_think_time(Duration::from_millis(500)),
    )
    .with_step(
        StepDefinition::new("create order", create_order)
            .with_check("order created status is 201", order_created)
            .with_check("order has ID", order_has_id)
            .with_check("response time < 200ms", created_quickly)
            .with_failure_rate("errors"),
    )
    .with_step(
        StepDefinition::new("get order", get_order)
            .with_check("get order status is 200", |output| {
                output.status() == Some(200)
            })
            .with_failure_rate("errors")
            .with_think_time(ORDER_THINK_TIME)
            .when(|ctx| ctx.get().scenario_values.order_id.is_some()),
    )
    .with_step(
        StepDefinition::new("list orders", list_orders)
            .with_check("list orders status is 200", |output| {
                output.status() == Some(200)
            })
            .with_check("list has orders", |output| {
                output
                    .json::<OrderListResponse>()
                    .is_some_and(|list| list.total > 0)
            })
            .with_failure_rate("errors")
            .with_think_time(Duration::from_millis(500)),
    );

    std::process::exit(exit_code(&run(builder)))
}
