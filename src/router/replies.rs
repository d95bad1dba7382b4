//! Texts sent back to users.

use rust_decimal::Decimal;

use crate::repo::BillSummary;
use crate::types::{Expenses, format_amount};

pub const IDENTIFY_YOURSELF: &str = "初次见面，请先告诉我怎么称呼你。比如：我叫小明";
pub const NO_LEDGER: &str = "你还没有账本。发送「我的账本」即可领取一个";
pub const UNSUPPORTED: &str = "暂不支持这种消息，请发送文字";
pub const FALLBACK: &str = "拜个早年吧";
pub const APOLOGY: &str = "服务开小差了，请稍后再试";
pub const FAILURE: &str = "发生了一个错误，请联系管理员";
pub const NOT_UNDERSTOOD: &str = "没听懂，请换个说法再试一次";
pub const AMOUNT_ILLEGAL: &str = "金额格式错误";
pub const MISSING_CATEGORY: &str = "请告诉我账单分类。比如：包子 餐费 15";
pub const UNKNOWN_EXPENSES: &str = "收支类型只能是收入或支出";
pub const MISSING_NAME: &str = "请告诉我你的称呼。比如：我叫小明";
pub const INVALID_DATE: &str = "日期格式应为 yyyy/mm/dd，且结束日期不早于开始日期";
pub const NO_CATEGORIES: &str = "还没有任何分类，记一笔账试试吧";

pub const HELP: &str = "记账：包子 餐费 15，或者：工资 工资收入 收入 10000\r\n\
查账：这个月花了多少钱，或者：3月1日到3月15日的餐费\r\n\
分类：我用过哪些分类\r\n\
账本：我的账本";

pub fn welcome(name: &str) -> String {
    format!("你好，{}！可以开始记账啦。比如：包子 餐费 15", name)
}

pub fn record_success(total: Decimal, expenses: Expenses) -> String {
    format!("记账成功。本月已{} {}", expenses.label(), format_amount(total))
}

pub fn summary(summary: &BillSummary) -> String {
    format!(
        "共 {} 笔\r\n收入 {}\r\n支出 {}\r\n结余 {}",
        summary.count,
        format_amount(summary.income),
        format_amount(summary.expense),
        format_amount(summary.balance())
    )
}

/// Reply for a request whose processing panicked.
pub fn defect(payload: &str) -> String {
    format!("something is wrong with {}", payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_success_formats_two_places() {
        assert_eq!(
            record_success(Decimal::from(15), Expenses::Expense),
            "记账成功。本月已支出 15.00"
        );
        assert_eq!(
            record_success(Decimal::new(1005, 1), Expenses::Income),
            "记账成功。本月已收入 100.50"
        );
    }

    #[test]
    fn summary_lists_totals_and_balance() {
        let text = summary(&BillSummary {
            income: Decimal::from(100),
            expense: Decimal::new(255, 1),
            count: 3,
        });
        assert_eq!(text, "共 3 笔\r\n收入 100.00\r\n支出 25.50\r\n结余 74.50");
    }
}
