//! Handler bodies for the routed functions.

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use super::args::{self, BookkeepingArgs, IdentityArgs, QueryBillArgs};
use super::error::HandlerError;
use super::replies;
use crate::classifier::catalog::{BOOKKEEPING, GET_USER_IDENTITY, QUERY_BILL};
use crate::repo::RepoError;
use crate::services::Services;
use crate::store::DocumentStore;
use crate::types::{Bill, Ledger, User};

async fn owned_ledger<S: DocumentStore>(
    services: &Services<S>,
    user: &User,
) -> Result<Ledger, HandlerError> {
    services
        .pool
        .query_owned(&user.id)
        .await?
        .ok_or(HandlerError::NoLedger)
}

/// Records the user's name and makes sure a ledger is on its way.
pub(super) async fn user_identity<S: DocumentStore>(
    services: Arc<Services<S>>,
    user: User,
    arguments: Value,
) -> Result<String, HandlerError> {
    let name = args::decode::<IdentityArgs>(GET_USER_IDENTITY, arguments)?.validate()?;
    let user = User::new(user.id, name);
    services.users.save(&user).await?;
    info!(user = %user.id, "Saved user identity");

    let owns_ledger = match services.pool.query_owned(&user.id).await {
        Ok(owned) => owned.is_some(),
        Err(e) => {
            warn!(user = %user.id, error = %e, "Owned-ledger lookup failed, allocating anyway");
            false
        }
    };
    if !owns_ledger {
        let pool = Arc::clone(&services.pool);
        let owner = user.clone();
        services.tasks.submit("allocate_ledger", async move {
            pool.ensure_owned(&owner).await.map(|_| ())
        });
    }

    Ok(replies::welcome(&user.display_name))
}

pub(super) async fn ledger<S: DocumentStore>(
    services: Arc<Services<S>>,
    user: User,
) -> Result<String, HandlerError> {
    let ledger = services.pool.ensure_owned(&user).await?;
    Ok(ledger.url)
}

pub(super) async fn categories<S: DocumentStore>(
    services: Arc<Services<S>>,
    user: User,
) -> Result<String, HandlerError> {
    let ledger = owned_ledger(&services, &user).await?;
    let categories = services.bills.list_categories(&ledger).await?;
    if categories.is_empty() {
        return Ok(replies::NO_CATEGORIES.to_string());
    }
    Ok(categories.join("\r\n"))
}

pub(super) async fn query_bill<S: DocumentStore>(
    services: Arc<Services<S>>,
    user: User,
    arguments: Value,
) -> Result<String, HandlerError> {
    let query = args::decode::<QueryBillArgs>(QUERY_BILL, arguments)?
        .into_query(services.now(), services.offset())?;
    let ledger = owned_ledger(&services, &user).await?;
    let summary = services.bills.summarize(&ledger, &query).await?;
    Ok(replies::summary(&summary))
}

/// Saves a bill and reports the month's running total for its kind.
///
/// The total is read before the new bill is written and includes it.
pub(super) async fn bookkeeping<S: DocumentStore>(
    services: Arc<Services<S>>,
    user: User,
    arguments: Value,
) -> Result<String, HandlerError> {
    let request = args::decode::<BookkeepingArgs>(BOOKKEEPING, arguments)?.validate()?;
    let ledger = owned_ledger(&services, &user).await?;

    let now = services.now();
    let total = services
        .bills
        .month_total(&ledger, request.expenses, now)
        .await?
        .checked_add(request.amount)
        .ok_or(RepoError::Overflow)?;

    let bill = Bill {
        remark: request.remark,
        categories: vec![request.category],
        amount: request.amount,
        expenses: request.expenses,
        author_id: user.id.clone(),
        author_name: user.display_name.clone(),
        timestamp_millis: now.timestamp_millis(),
    };
    services.bills.save(&ledger, &bill).await?;
    info!(user = %user.id, ledger_id = %ledger.id, amount = %bill.amount, "Recorded bill");

    Ok(replies::record_success(total, request.expenses))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::BillQuery;
    use crate::router::{ValidationError, replies};
    use crate::store::StoreErrorKind;
    use crate::store::memory::Operation;
    use crate::test_utils::Fixture;
    use crate::types::{Expenses, UserId};
    use rust_decimal::Decimal;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn bookkeeping_reports_running_month_total() {
        let fixture = Fixture::new();
        let user = fixture.identified_user("u1", "小明").await;
        let ledger = fixture.assign_ledger(&user).await;
        fixture.seed_bill(&ledger, &user, Decimal::from(10), Expenses::Expense).await;

        let reply = bookkeeping(
            fixture.services.clone(),
            user.clone(),
            json!({"remark": "包子", "amount": "5", "expenses": "支出", "category": "餐费"}),
        )
        .await
        .unwrap();

        assert_eq!(reply, "记账成功。本月已支出 15.00");
        let bills = fixture
            .services
            .bills
            .search(&ledger, &BillQuery::default())
            .await
            .unwrap();
        assert_eq!(bills.len(), 2);
        let saved = bills.iter().find(|b| b.remark == "包子").unwrap();
        assert_eq!(saved.categories, vec!["餐费".to_string()]);
        assert_eq!(saved.author_id, user.id);
        assert_eq!(saved.author_name, "小明");
    }

    #[tokio::test]
    async fn income_total_ignores_expenses() {
        let fixture = Fixture::new();
        let user = fixture.identified_user("u1", "小明").await;
        let ledger = fixture.assign_ledger(&user).await;
        fixture.seed_bill(&ledger, &user, Decimal::from(10), Expenses::Expense).await;

        let reply = bookkeeping(
            fixture.services.clone(),
            user,
            json!({"remark": "工资", "amount": 100, "expenses": "收入", "category": "工资"}),
        )
        .await
        .unwrap();
        assert_eq!(reply, "记账成功。本月已收入 100.00");
    }

    #[tokio::test]
    async fn malformed_amount_saves_nothing() {
        let fixture = Fixture::new();
        let user = fixture.identified_user("u1", "小明").await;
        let ledger = fixture.assign_ledger(&user).await;
        let creates_before = fixture.store.calls(Operation::Create);

        let err = bookkeeping(
            fixture.services.clone(),
            user,
            json!({"remark": "包子", "amount": "abc", "category": "餐费"}),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, HandlerError::Validation(ValidationError::IllegalAmount(_))));
        assert_eq!(fixture.store.calls(Operation::Create), creates_before);
        assert!(fixture.store.records(&ledger.container_token, &ledger.table_token).is_empty());
    }

    #[tokio::test]
    async fn oversized_amount_is_rejected_every_time() {
        let fixture = Fixture::new();
        let user = fixture.identified_user("u1", "小明").await;
        let ledger = fixture.assign_ledger(&user).await;

        for _ in 0..2 {
            let err = bookkeeping(
                fixture.services.clone(),
                user.clone(),
                json!({"remark": "房子", "amount": "70000000000000000000000000000", "category": "住房"}),
            )
            .await
            .unwrap_err();
            assert!(matches!(err, HandlerError::Validation(ValidationError::IllegalAmount(_))));
            assert_eq!(err.user_message(), replies::AMOUNT_ILLEGAL);
        }
        assert!(fixture.store.records(&ledger.container_token, &ledger.table_token).is_empty());
    }

    #[tokio::test]
    async fn stored_totals_overflowing_is_a_cached_failure() {
        let fixture = Fixture::new();
        let user = fixture.identified_user("u1", "小明").await;
        let ledger = fixture.assign_ledger(&user).await;
        let huge = Decimal::from_str_exact("70000000000000000000000000000").unwrap();
        fixture.seed_bill(&ledger, &user, huge, Expenses::Expense).await;
        fixture.seed_bill(&ledger, &user, huge, Expenses::Expense).await;
        let creates_before = fixture.store.calls(Operation::Create);

        let err = bookkeeping(
            fixture.services.clone(),
            user,
            json!({"remark": "包子", "amount": "5", "category": "餐费"}),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, HandlerError::Repo(RepoError::Overflow)));
        assert_eq!(err.disposition(), crate::router::Disposition::Failure);
        assert_eq!(fixture.store.calls(Operation::Create), creates_before);
    }

    #[tokio::test]
    async fn bookkeeping_without_ledger_is_an_authorization_gap() {
        let fixture = Fixture::new();
        let user = fixture.identified_user("u1", "小明").await;

        let err = bookkeeping(
            fixture.services.clone(),
            user,
            json!({"amount": "5", "category": "餐费"}),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, HandlerError::NoLedger));
    }

    #[tokio::test]
    async fn categories_are_listed_one_per_line() {
        let fixture = Fixture::new();
        let user = fixture.identified_user("u1", "小明").await;
        let ledger = fixture.assign_ledger(&user).await;
        assert_eq!(
            categories(fixture.services.clone(), user.clone()).await.unwrap(),
            replies::NO_CATEGORIES
        );

        for (category, amount) in [("餐费", "5"), ("交通", "3"), ("餐费", "7")] {
            bookkeeping(
                fixture.services.clone(),
                user.clone(),
                json!({"amount": amount, "category": category}),
            )
            .await
            .unwrap();
        }

        let reply = categories(fixture.services.clone(), user).await.unwrap();
        assert_eq!(reply, "餐费\r\n交通");
        assert_eq!(fixture.store.records(&ledger.container_token, &ledger.table_token).len(), 3);
    }

    #[tokio::test]
    async fn query_bill_summarizes_current_month() {
        let fixture = Fixture::new();
        let user = fixture.identified_user("u1", "小明").await;
        let ledger = fixture.assign_ledger(&user).await;
        fixture.seed_bill(&ledger, &user, Decimal::from(100), Expenses::Income).await;
        fixture.seed_bill(&ledger, &user, Decimal::new(255, 1), Expenses::Expense).await;

        let reply = query_bill(fixture.services.clone(), user.clone(), json!({})).await.unwrap();
        assert_eq!(reply, "共 2 笔\r\n收入 100.00\r\n支出 25.50\r\n结余 74.50");

        let reply = query_bill(fixture.services.clone(), user, json!({"expenses": "支出"}))
            .await
            .unwrap();
        assert_eq!(reply, "共 1 笔\r\n收入 0.00\r\n支出 25.50\r\n结余 -25.50");
    }

    #[tokio::test]
    async fn get_ledger_allocates_once() {
        let fixture = Fixture::new();
        let user = fixture.identified_user("u1", "小明").await;

        let first = ledger(fixture.services.clone(), user.clone()).await.unwrap();
        let second = ledger(fixture.services.clone(), user.clone()).await.unwrap();
        assert_eq!(first, second);

        let owned = fixture.services.pool.query_owned(&user.id).await.unwrap().unwrap();
        assert_eq!(owned.url, first);
    }

    #[tokio::test]
    async fn identity_saves_user_and_allocates_in_background() {
        let fixture = Fixture::new();
        let anonymous = User::unidentified(UserId::new("u1"));

        let reply = user_identity(fixture.services.clone(), anonymous, json!({"name": "小明"}))
            .await
            .unwrap();
        assert_eq!(reply, replies::welcome("小明"));

        let saved = fixture.services.users.get(&UserId::new("u1")).await.unwrap().unwrap();
        assert_eq!(saved.display_name, "小明");

        let mut owned = None;
        for _ in 0..100 {
            owned = fixture.services.pool.query_owned(&saved.id).await.unwrap();
            if owned.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(owned.unwrap().owner_name, "小明");
    }

    #[tokio::test]
    async fn identity_without_name_is_rejected() {
        let fixture = Fixture::new();
        let err = user_identity(
            fixture.services.clone(),
            User::unidentified(UserId::new("u1")),
            json!({"name": ""}),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, HandlerError::Validation(ValidationError::MissingName)));
        assert!(fixture.services.users.get(&UserId::new("u1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn transient_store_failure_surfaces_as_transient() {
        let fixture = Fixture::new();
        let user = fixture.identified_user("u1", "小明").await;
        let _ledger = fixture.assign_ledger(&user).await;
        fixture.store.fail_next(Operation::Read, StoreErrorKind::Transient);

        let err = bookkeeping(
            fixture.services.clone(),
            user,
            json!({"amount": "5", "category": "餐费"}),
        )
        .await
        .unwrap_err();
        assert!(!err.is_cacheable());
    }
}
