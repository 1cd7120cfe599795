use async_trait::async_trait;
use chrono::{DateTime, Datelike, Local, TimeZone, Timelike};
use serde_json::{Map, Value, json};

use super::ToolFunction;
use crate::Result;

/// Reports the current local date and time
pub struct DateTool;

pub(crate) fn describe_datetime<Tz: TimeZone>(now: &DateTime<Tz>) -> Value
where
    Tz::Offset: std::fmt::Display,
{
    json!({
        "date": {
            "iso": now.to_rfc3339(),
            "year": now.year(),
            "month": now.month(),
            "day": now.day(),
            "hour": now.hour(),
            "minute": now.minute(),
            "second": now.second(),
            "day_of_week": now.weekday().to_string(),
            "timezone": now.offset().to_string(),
            "timestamp": now.timestamp(),
        }
    })
}

#[async_trait]
impl ToolFunction for DateTool {
    #[inline]
    fn name(&self) -> &str {
        "get_date_tool"
    }

    #[inline]
    fn description(&self) -> &str {
        "Get the current datetime"
    }

    #[inline]
    fn json_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {}
        })
    }

    #[inline]
    async fn execute(&self, _arguments: &Map<String, Value>) -> Result<Value> {
        Ok(describe_datetime(&Local::now()))
    }
}
