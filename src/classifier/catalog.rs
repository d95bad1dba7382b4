//! The function catalog offered to the classifier.
//!
//! Function names here are the routing keys of [`crate::router`]; the
//! descriptions and the system prompt are written for the model, in the
//! users' language.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset};
use serde::Serialize;

use crate::types::Expenses;

pub const BOOKKEEPING: &str = "bookkeeping";
pub const QUERY_BILL: &str = "query_bill";
pub const GET_LEDGER: &str = "get_ledger";
pub const GET_CATEGORY: &str = "get_category";
pub const GET_USER_IDENTITY: &str = "get_user_identity";
pub const GET_SOURCE_CODE: &str = "get_source_code";
pub const GET_HELP: &str = "get_help";

/// Date format used for `query_bill` arguments.
pub const DATE_FORMAT: &str = "%Y/%m/%d";

/// One function the model may call, in the chat-completions schema.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionSpec {
    pub name: String,
    pub description: String,
    pub parameters: Parameters,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Parameters {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub properties: BTreeMap<String, Property>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Property {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub description: String,
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<String>>,
}

impl Property {
    fn string(description: impl Into<String>) -> Self {
        Property {
            kind: "string",
            description: description.into(),
            allowed: None,
        }
    }

    fn expenses() -> Self {
        Property {
            kind: "string",
            description: "收入还是支出".to_string(),
            allowed: Some(vec![
                Expenses::INCOME_LABEL.to_string(),
                Expenses::EXPENSE_LABEL.to_string(),
            ]),
        }
    }
}

impl FunctionSpec {
    fn new(name: &str, description: &str) -> Self {
        FunctionSpec {
            name: name.to_string(),
            description: description.to_string(),
            parameters: Parameters {
                kind: "object",
                properties: BTreeMap::new(),
                required: Vec::new(),
            },
        }
    }

    fn property(mut self, name: &str, property: Property) -> Self {
        self.parameters.properties.insert(name.to_string(), property);
        self
    }

    fn required(mut self, names: &[&str]) -> Self {
        self.parameters.required = names.iter().map(|n| n.to_string()).collect();
        self
    }
}

/// The catalog for a request made at `now`.
///
/// Date parameters mention today's date so the model can resolve relative
/// phrases such as "last week".
pub fn function_catalog(now: DateTime<FixedOffset>) -> Vec<FunctionSpec> {
    let today = now.format(DATE_FORMAT);
    vec![
        FunctionSpec::new(BOOKKEEPING, "记账工具，支持记录收入支出")
            .property("remark", Property::string("名称或描述"))
            .property("amount", Property::string("账单金额 format by float64"))
            .property("expenses", Property::expenses())
            .property("category", Property::string("账单分类"))
            .required(&["remark", "amount", "expenses", "category"]),
        FunctionSpec::new(QUERY_BILL, "查询账单信息")
            .property(
                "start_date",
                Property::string(format!("查账开始时间，今天的日期是 {}，格式为 yyyy/mm/dd", today)),
            )
            .property(
                "end_date",
                Property::string(format!("查账结束时间，今天的日期是 {}，格式为 yyyy/mm/dd", today)),
            )
            .property("expenses", Property::expenses())
            .property("category", Property::string("要查询的账单分类")),
        FunctionSpec::new(GET_LEDGER, "获取账本信息，如: URL"),
        FunctionSpec::new(GET_CATEGORY, "获取分类"),
        FunctionSpec::new(GET_USER_IDENTITY, "获取用户的称呼")
            .property("name", Property::string("用户希望被称呼的名字")),
        FunctionSpec::new(GET_SOURCE_CODE, "获取源代码"),
        FunctionSpec::new(GET_HELP, "获取使用帮助，如: 怎么记账"),
    ]
}

/// The system prompt for a request made at `now`.
pub fn system_prompt(now: DateTime<FixedOffset>) -> String {
    format!(
        "你叫Richman 是一个基于飞书表格的记账软件。当前时间是 {} 如果不明确用户的意图，\
         可以指导用户使用这个软件。比如：可以通过输入包子花了15或者工资收入100 用来记账",
        now.format("%Y-%m-%d %H:%M:%S")
    )
}
