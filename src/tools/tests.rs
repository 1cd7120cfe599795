use super::*;
use chrono::{FixedOffset, TimeZone};
use serde_json::json;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path, query_param},
};

struct EchoTool;

#[async_trait]
impl ToolFunction for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the given text"
    }

    fn json_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"text": {"type": "string"}},
            "required": ["text"]
        })
    }

    async fn execute(&self, arguments: &Map<String, Value>) -> Result<Value> {
        Ok(json!({"echo": arguments.get("text").cloned().unwrap_or(Value::Null)}))
    }
}

struct BrokenSchemaTool;

#[async_trait]
impl ToolFunction for BrokenSchemaTool {
    fn name(&self) -> &str {
        "broken"
    }

    fn description(&self) -> &str {
        "Has a schema that cannot compile"
    }

    fn json_schema(&self) -> Value {
        json!({"type": 42})
    }

    async fn execute(&self, _arguments: &Map<String, Value>) -> Result<Value> {
        Ok(Value::Null)
    }
}

fn args(value: Value) -> Map<String, Value> {
    value.as_object().cloned().expect("test arguments are objects")
}

fn echo_registry() -> ToolRegistry {
    ToolRegistry::new(["qwen2.5:3b"])
        .with_tool(Arc::new(EchoTool))
        .expect("echo registers")
}

#[test]
fn duplicate_registration_fails() {
    let mut registry = echo_registry();
    let err = registry
        .register(Arc::new(EchoTool))
        .expect_err("duplicate should fail");
    assert!(matches!(err, RagError::DuplicateTool { name } if name == "echo"));
    assert_eq!(registry.len(), 1);
}

#[test]
fn invalid_schema_fails_registration() {
    let mut registry = ToolRegistry::new(Vec::<String>::new());
    let err = registry
        .register(Arc::new(BrokenSchemaTool))
        .expect_err("schema should not compile");
    assert!(matches!(err, RagError::Config(_)));
    assert!(registry.is_empty());
}

#[test]
fn get_is_exact_match() {
    let registry = echo_registry();
    assert_eq!(registry.get("echo").expect("echo exists").name(), "echo");

    for name in ["Echo", "echo ", "ech", ""] {
        let err = registry.get(name).err().expect("lookup should fail");
        assert!(matches!(err, RagError::UnknownTool { .. }), "{name:?}");
    }
}

#[test]
fn definitions_only_for_allowed_models() {
    let registry = echo_registry()
        .with_tool(Arc::new(DateTool))
        .expect("date registers");

    let definitions = registry.definitions_for("qwen2.5:3b");
    assert_eq!(definitions.len(), 2);
    assert_eq!(definitions[0].name, "echo");
    assert_eq!(definitions[1].name, "get_date_tool");

    assert!(registry.definitions_for("llama2").is_empty());
    assert!(registry.definitions_for("qwen2.5").is_empty());
}

#[test]
fn default_registry_has_builtin_tools() {
    let config = Config::default();
    let registry = ToolRegistry::create_default(&config).expect("default registry builds");

    assert_eq!(registry.names(), vec!["get_weather_tool", "get_date_tool"]);
    assert!(registry.supports_tools("qwen2.5:3b"));
}

#[tokio::test]
async fn invoke_validates_arguments() {
    let registry = echo_registry();
    let handle = registry.get("echo").expect("echo exists");

    let result = handle
        .invoke(&args(json!({"text": "hi"})))
        .await
        .expect("valid call");
    assert_eq!(result, json!({"echo": "hi"}));

    let err = handle
        .invoke(&args(json!({"text": 5})))
        .await
        .expect_err("wrong type should fail");
    assert!(matches!(err, RagError::ToolExecution { tool, .. } if tool == "echo"));

    let err = handle
        .invoke(&Map::new())
        .await
        .expect_err("missing field should fail");
    assert!(err.to_string().contains("invalid arguments"));
}

#[test]
fn weather_tool_definition() {
    let definition = WeatherTool::new().definition();

    assert_eq!(definition.name, "get_weather_tool");
    let required = definition.json_schema["required"]
        .as_array()
        .expect("has required array");
    assert_eq!(required.len(), 2);
    assert_eq!(
        definition.json_schema["properties"]["format"]["enum"],
        json!(["celsius", "fahrenheit"])
    );
}

#[test]
fn date_tool_fields() {
    let offset = FixedOffset::east_opt(3600).expect("valid offset");
    let moment = offset
        .with_ymd_and_hms(2024, 3, 9, 14, 5, 30)
        .single()
        .expect("valid date");

    let value = clock::describe_datetime(&moment);
    let date = &value["date"];
    assert_eq!(date["year"], 2024);
    assert_eq!(date["month"], 3);
    assert_eq!(date["day"], 9);
    assert_eq!(date["hour"], 14);
    assert_eq!(date["minute"], 5);
    assert_eq!(date["second"], 30);
    assert_eq!(date["day_of_week"], "Sat");
    assert_eq!(date["iso"], "2024-03-09T14:05:30+01:00");
}

#[tokio::test]
async fn date_tool_executes() {
    let value = DateTool.execute(&Map::new()).await.expect("date tool runs");
    assert!(value["date"]["year"].as_i64().expect("year is a number") >= 2024);
}

fn wttr_body() -> Value {
    json!({
        "current_condition": [{
            "temp_C": "18",
            "temp_F": "64",
            "FeelsLikeC": "17",
            "FeelsLikeF": "63",
            "humidity": "72",
            "windspeedKmph": "11",
            "weatherDesc": [{"value": "Partly cloudy"}]
        }]
    })
}

#[tokio::test(flavor = "multi_thread")]
async fn weather_tool_formats_celsius_and_fahrenheit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/Paris"))
        .and(query_param("format", "j1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(wttr_body()))
        .mount(&server)
        .await;

    let tool = WeatherTool::new().with_base_url(server.uri());

    let celsius = tool
        .execute(&args(json!({"location": "Paris", "format": "celsius"})))
        .await
        .expect("weather lookup succeeds");
    assert_eq!(
        celsius,
        json!({
            "location": "Paris",
            "temperature": "18°C",
            "description": "Partly cloudy",
            "humidity": "72%",
            "wind_speed": "11 km/h",
            "feels_like": "17°C"
        })
    );

    let fahrenheit = tool
        .execute(&args(json!({"location": "Paris", "format": "fahrenheit"})))
        .await
        .expect("weather lookup succeeds");
    assert_eq!(fahrenheit["temperature"], "64°F");
    assert_eq!(fahrenheit["feels_like"], "63°F");
}

#[tokio::test(flavor = "multi_thread")]
async fn weather_tool_reports_upstream_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let tool = WeatherTool::new().with_base_url(server.uri());
    let err = tool
        .execute(&args(json!({"location": "Paris", "format": "celsius"})))
        .await
        .expect_err("upstream failure surfaces");

    assert!(matches!(err, RagError::ToolExecution { ref tool, .. } if tool == "get_weather_tool"));
    assert!(err.to_string().contains("Could not fetch weather data"));
}

#[tokio::test]
async fn weather_tool_rejects_unknown_format() {
    let err = WeatherTool::new()
        .execute(&args(json!({"location": "Paris", "format": "kelvin"})))
        .await
        .expect_err("kelvin is unsupported");
    assert!(matches!(err, RagError::ToolExecution { .. }));
}
