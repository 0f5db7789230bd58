use crate::db::{self, NewLoan, PaymentOutcome};
use crate::tests::{seed_borrower, test_state};
use crate::utils;

#[actix_web::test]
async fn seeded_admin_credentials_verify() {
    let state = test_state().await;
    let admin = db::get_user_by_username(&state, "admin")
        .await
        .unwrap()
        .expect("admin user seeded at startup");
    assert_eq!(admin.email, "admin@example.com");
    assert!(utils::verify_password("123456", &admin.password));
    assert!(!utils::verify_password("654321", &admin.password));
}

#[actix_web::test]
async fn payment_reduces_remaining_by_exact_amount() {
    let state = test_state().await;
    seed_borrower(&state, "Sara", 1000.0).await;

    let outcome = db::record_payment(&state, "Sara", 400.0, "2025-02-01")
        .await
        .unwrap();
    assert_eq!(outcome, PaymentOutcome::Recorded);
    assert_eq!(db::sum_all_payments(&state).await.unwrap(), 400.0);

    // Over-remaining payment is rejected and leaves state unchanged.
    let outcome = db::record_payment(&state, "Sara", 700.0, "2025-02-02")
        .await
        .unwrap();
    assert_eq!(outcome, PaymentOutcome::ExceedsRemaining { remaining: 600.0 });
    assert_eq!(db::sum_all_payments(&state).await.unwrap(), 400.0);
}

#[actix_web::test]
async fn settled_borrower_rejects_further_payments() {
    let state = test_state().await;
    let id = seed_borrower(&state, "Khalid", 1000.0).await;

    let outcome = db::record_payment(&state, "Khalid", 1000.0, "2025-02-01")
        .await
        .unwrap();
    assert_eq!(outcome, PaymentOutcome::Recorded);

    let outcome = db::record_payment(&state, "Khalid", 1.0, "2025-02-02")
        .await
        .unwrap();
    assert_eq!(outcome, PaymentOutcome::AlreadySettled);
    assert_eq!(db::sum_payments_for(&state, id).await.unwrap(), 1000.0);
}

#[actix_web::test]
async fn unknown_borrower_name_is_reported() {
    let state = test_state().await;
    let outcome = db::record_payment(&state, "Nobody", 100.0, "2025-02-01")
        .await
        .unwrap();
    assert_eq!(outcome, PaymentOutcome::UnknownBorrower);
}

#[actix_web::test]
async fn name_uniqueness_ignores_case_and_whitespace() {
    let state = test_state().await;
    let id = seed_borrower(&state, "Ali", 500.0).await;

    assert!(db::borrower_name_exists(&state, "Ali", None).await.unwrap());
    assert!(db::borrower_name_exists(&state, " ali ", None).await.unwrap());
    assert!(db::borrower_name_exists(&state, "ALI", None).await.unwrap());
    assert!(!db::borrower_name_exists(&state, "Omar", None).await.unwrap());

    // The borrower itself is excluded when editing.
    assert!(!db::borrower_name_exists(&state, "ALI", Some(id)).await.unwrap());
}

#[actix_web::test]
async fn deleting_borrower_removes_payments_and_keeps_devices() {
    let state = test_state().await;
    let id = seed_borrower(&state, "Huda", 1000.0).await;
    db::record_payment(&state, "Huda", 250.0, "2025-02-01")
        .await
        .unwrap();

    db::delete_borrower(&state, id).await.unwrap();

    assert!(db::get_borrower(&state, id).await.unwrap().is_none());
    assert!(db::payments_for_borrower(&state, id).await.unwrap().is_empty());
    // Device rows are intentionally left behind.
    assert_eq!(db::devices_for_borrower(&state, id).await.unwrap().len(), 1);
}

#[actix_web::test]
async fn top_up_adds_exactly_one_dated_device_row() {
    let state = test_state().await;
    let id = seed_borrower(&state, "Omar", 800.0).await;

    db::top_up_loan(&state, id, 300.0, "phone", None, "2025-03-05")
        .await
        .unwrap();

    let borrower = db::get_borrower(&state, id).await.unwrap().unwrap();
    assert_eq!(borrower.total_amount, 1100.0);

    let devices = db::devices_for_borrower(&state, id).await.unwrap();
    assert_eq!(devices.len(), 2);
    // Most recent first.
    assert_eq!(devices[0].device_date.as_deref(), Some("2025-03-05"));
    assert_eq!(devices[0].device_amount, Some(300.0));
    assert_eq!(devices[0].device_description.as_deref(), Some("phone"));
}

#[actix_web::test]
async fn deleting_device_decrements_owner_total_and_spares_payments() {
    let state = test_state().await;
    let id = seed_borrower(&state, "Fahad", 1000.0).await;
    db::top_up_loan(&state, id, 500.0, "laptop", None, "2025-02-01")
        .await
        .unwrap();
    db::record_payment(&state, "Fahad", 200.0, "2025-02-10")
        .await
        .unwrap();

    let devices = db::devices_for_borrower(&state, id).await.unwrap();
    assert_eq!(devices.len(), 2);

    let owner = db::delete_device(&state, devices[0].id).await.unwrap();
    assert_eq!(owner, Some(id));
    let borrower = db::get_borrower(&state, id).await.unwrap().unwrap();
    assert_eq!(borrower.total_amount, 1000.0);

    // No floor at zero and payments stay untouched.
    db::delete_device(&state, devices[1].id).await.unwrap();
    let borrower = db::get_borrower(&state, id).await.unwrap().unwrap();
    assert_eq!(borrower.total_amount, 0.0);
    assert_eq!(db::sum_payments_for(&state, id).await.unwrap(), 200.0);

    assert_eq!(db::delete_device(&state, devices[0].id).await.unwrap(), None);
}

#[actix_web::test]
async fn dashboard_totals_follow_the_ledger() {
    let state = test_state().await;
    assert_eq!(db::sum_all_loans(&state).await.unwrap(), 0.0);
    assert_eq!(db::sum_all_payments(&state).await.unwrap(), 0.0);

    let id = seed_borrower(&state, "Sara", 1000.0).await;
    assert_eq!(db::sum_all_loans(&state).await.unwrap(), 1000.0);
    assert_eq!(db::sum_all_payments(&state).await.unwrap(), 0.0);

    db::record_payment(&state, "Sara", 400.0, "2025-02-01")
        .await
        .unwrap();
    assert_eq!(db::sum_all_payments(&state).await.unwrap(), 400.0);

    let outcome = db::record_payment(&state, "Sara", 700.0, "2025-02-02")
        .await
        .unwrap();
    assert_eq!(outcome, PaymentOutcome::ExceedsRemaining { remaining: 600.0 });
    assert_eq!(db::sum_all_payments(&state).await.unwrap(), 400.0);

    db::delete_borrower(&state, id).await.unwrap();
    assert_eq!(db::sum_all_loans(&state).await.unwrap(), 0.0);
    assert_eq!(db::sum_all_payments(&state).await.unwrap(), 0.0);
}

#[actix_web::test]
async fn payment_edits_bypass_the_balance_check() {
    let state = test_state().await;
    let id = seed_borrower(&state, "Noor", 500.0).await;
    db::record_payment(&state, "Noor", 300.0, "2025-02-01")
        .await
        .unwrap();

    let payments = db::payments_for_borrower(&state, id).await.unwrap();
    let payment = &payments[0];
    db::update_payment(&state, payment.id, 10_000.0, "2025-02-02", "corrected", None)
        .await
        .unwrap();

    // The edit pushes the borrower negative without complaint.
    assert_eq!(db::sum_payments_for(&state, id).await.unwrap(), 10_000.0);
    let edited = db::get_payment(&state, payment.id).await.unwrap().unwrap();
    assert_eq!(edited.payment_date, "2025-02-02");
    assert_eq!(edited.device_description.as_deref(), Some("corrected"));
}

#[actix_web::test]
async fn borrower_without_device_fields_gets_no_device_row() {
    let state = test_state().await;
    let id = db::create_borrower(
        &state,
        &NewLoan {
            name: "Mona".to_owned(),
            number_phone: "0551112222".to_owned(),
            total_amount: 900.0,
            notes: String::new(),
            device_description: String::new(),
            device_image: None,
            loan_date: String::new(),
        },
    )
    .await
    .unwrap();

    assert!(db::devices_for_borrower(&state, id).await.unwrap().is_empty());
}

#[actix_web::test]
async fn username_check_excludes_the_account_being_reset() {
    let state = test_state().await;
    assert!(db::username_in_use(&state, "admin", None).await.unwrap());
    assert!(!db::username_in_use(&state, "admin", Some("admin@example.com"))
        .await
        .unwrap());
    assert!(!db::username_in_use(&state, "boss", None).await.unwrap());
}

#[actix_web::test]
async fn user_update_changes_username_and_password() {
    let state = test_state().await;
    let admin = db::get_user_by_username(&state, "admin")
        .await
        .unwrap()
        .unwrap();

    let hashed = utils::hash_password("hunter22").unwrap();
    db::update_user_fields(&state, admin.id, None, Some("boss"), Some(&hashed))
        .await
        .unwrap();

    assert!(db::get_user_by_username(&state, "admin").await.unwrap().is_none());
    let updated = db::get_user_by_username(&state, "boss")
        .await
        .unwrap()
        .expect("renamed user exists");
    assert_eq!(updated.email, "admin@example.com");
    assert!(utils::verify_password("hunter22", &updated.password));
}
