mod support;

use q4mig_core::{
    Analyst, AnalystCommitteeLlm, AnalystsSnapshot, CommitteeRole, FaqSnapshot, LlmCommittee,
    LlmMember, LoginStatus, MatchKind, OperationStatus, PersonsMergedSnapshot, PersonsSnapshot,
    SINGLE_FAQ_LIST_NAME,
};
use q4mig_ops::{run_operation, site_key, Operation, OperationError};
use q4mig_screens::fake::{FakeAdmin, FakeGroup, FakeItem, FakeLauncher, FakeSection};
use q4mig_screens::ContentSection;
use support::{base_url, harness, site};

fn source_and_destination(source: FakeAdmin, destination: FakeAdmin) -> FakeLauncher {
    FakeLauncher::sites(vec![
        (base_url("acme-old"), source),
        (base_url("acme"), destination),
    ])
}

fn question(q: &str, a: &str) -> FakeItem {
    if a.is_empty() {
        FakeItem::new(&[("question", q)])
    } else {
        FakeItem::new(&[("question", q), ("answer", a)])
    }
}

#[tokio::test]
async fn faq_single_list_is_renamed_and_empty_answers_are_skipped() {
    let source = FakeAdmin::logged_in().with_section(
        ContentSection::Faq,
        FakeSection::grouped(vec![FakeGroup::new(
            "Investor FAQ",
            vec![
                question("Who is the transfer agent?", "Computershare."),
                question("When is the annual meeting?", "In May."),
                question("Where can I find filings?", ""),
            ],
        )]),
    );
    // The first question's answer editor loads late twice before rendering.
    source.set_lazy_answer_opens(2);
    let destination = FakeAdmin::logged_in();
    let h = harness(source_and_destination(source, destination.clone())).await;
    let acme = site("acme");

    let scraped = run_operation(&h.ctx, Operation::ScrapeFaq, &acme).await.unwrap();
    assert_eq!(scraped.created, 3);
    let faq = h.ctx.snapshots.read::<FaqSnapshot>(site_key(&acme)).await.unwrap().payload;
    assert_eq!(faq.lists.len(), 1);
    assert_eq!(faq.lists[0].name, SINGLE_FAQ_LIST_NAME);
    assert_eq!(faq.lists[0].questions[0].answer, "Computershare.");
    assert_eq!(faq.lists[0].questions[2].answer, "");
    assert!(h.ctx.state.site("acme").await.faq_captured);

    let migrated = run_operation(&h.ctx, Operation::MigrateFaq, &acme).await.unwrap();
    assert_eq!(migrated.created, 2);
    assert_eq!(migrated.skipped, 1);
    let faq_section = destination.section(ContentSection::Faq);
    assert_eq!(faq_section.groups.len(), 1);
    let list = faq_section.group(SINGLE_FAQ_LIST_NAME).unwrap();
    assert_eq!(list.items.len(), 2);
    assert_eq!(list.items[1].field("answer"), Some("In May."));

    let again = run_operation(&h.ctx, Operation::MigrateFaq, &acme).await.unwrap();
    assert_eq!(again.created, 0);
    assert_eq!(again.skipped, 3);
    assert_eq!(destination.section(ContentSection::Faq).item_count(), 2);
}

#[tokio::test]
async fn delete_leaves_rows_awaiting_approval() {
    let mut releases = vec![FakeItem::new(&[("title", "Q3 results")]).with_status("For Approval")];
    releases.extend((1..=12).map(|i| FakeItem::new(&[("title", &format!("Release {i}"))])));
    let destination = FakeAdmin::logged_in()
        .with_page_size(5)
        .with_section(ContentSection::PressReleases, FakeSection::flat(releases));
    let h = harness(FakeLauncher::new(destination.clone())).await;

    let report = run_operation(
        &h.ctx,
        Operation::Delete(ContentSection::PressReleases),
        &site("acme"),
    )
    .await
    .unwrap();

    assert_eq!(report.deleted, 12);
    assert_eq!(report.skipped, 1);
    let left = destination.section(ContentSection::PressReleases);
    assert_eq!(left.item_count(), 1);
    assert_eq!(left.items()[0].field("title"), Some("Q3 results"));
    let log = destination.action_log();
    assert_eq!(
        log.iter().filter(|l| l.as_str() == "click #btnConfirmDelete").count(),
        12
    );
}

#[tokio::test]
async fn delete_of_a_grouped_section_drains_every_group() {
    let destination = FakeAdmin::logged_in().with_page_size(3).with_section(
        ContentSection::DownloadLists,
        FakeSection::grouped(vec![
            FakeGroup::new(
                "Annual Reports",
                (1..=7).map(|i| FakeItem::new(&[("title", &format!("AR {i}"))])).collect(),
            ),
            FakeGroup::new("Proxy", vec![FakeItem::new(&[("title", "Proxy 2024")])]),
        ]),
    );
    let h = harness(FakeLauncher::new(destination.clone())).await;

    let report = run_operation(
        &h.ctx,
        Operation::Delete(ContentSection::DownloadLists),
        &site("acme"),
    )
    .await
    .unwrap();

    assert_eq!(report.deleted, 8);
    let left = destination.section(ContentSection::DownloadLists);
    assert_eq!(left.groups.len(), 2);
    assert_eq!(left.item_count(), 0);
}

#[tokio::test]
async fn a_delete_that_never_takes_effect_stalls_and_is_recorded() {
    let destination = FakeAdmin::logged_in().with_section(
        ContentSection::Events,
        FakeSection::flat(vec![
            FakeItem::new(&[("title", "Investor Day")]),
            FakeItem::new(&[("title", "Q4 Call")]),
        ]),
    );
    destination.set_stuck_deletes(ContentSection::Events);
    let h = harness(FakeLauncher::new(destination.clone())).await;

    let err = run_operation(&h.ctx, Operation::Delete(ContentSection::Events), &site("acme"))
        .await
        .unwrap_err();

    match err {
        OperationError::Stalled {
            remaining,
            attempts,
            ..
        } => {
            assert_eq!(remaining, 2);
            assert_eq!(attempts, 10);
        }
        other => panic!("expected a stall, got {other}"),
    }
    let state = h.ctx.state.site("acme").await;
    assert_eq!(state.operation_status, OperationStatus::Failed);
    assert!(state.last_error.unwrap().contains("stalled"));
    assert_eq!(state.current_operation.as_deref(), Some("delete-events"));
    assert!(destination.is_closed());
}

#[tokio::test]
async fn analysts_are_scraped_across_every_page() {
    let analysts = (1..=23)
        .map(|i| {
            FakeItem::new(&[
                ("firm", "Raymond James"),
                ("name", &format!("Analyst {i:02}")),
                ("email", &format!("a{i}@rj.example")),
            ])
        })
        .collect();
    let source = FakeAdmin::logged_in()
        .with_page_size(5)
        .with_section(ContentSection::Analysts, FakeSection::flat(analysts));
    let h = harness(source_and_destination(source, FakeAdmin::logged_in())).await;
    let acme = site("acme");

    run_operation(&h.ctx, Operation::ScrapeAnalysts, &acme).await.unwrap();

    let snapshot = h
        .ctx
        .snapshots
        .read::<AnalystsSnapshot>(site_key(&acme))
        .await
        .unwrap()
        .payload;
    assert_eq!(snapshot.analysts.len(), 23);
    assert_eq!(snapshot.analysts[0].name, "Analyst 01");
    assert_eq!(snapshot.analysts[22].name, "Analyst 23");
    assert_eq!(snapshot.analysts[22].email, "a23@rj.example");
    assert_eq!(snapshot.analysts[22].location, "");
    assert!(h.ctx.state.site("acme").await.analyst_list_captured);
}

#[tokio::test]
async fn migrate_analysts_only_creates_missing_rows() {
    let destination = FakeAdmin::logged_in().with_section(
        ContentSection::Analysts,
        FakeSection::flat(vec![FakeItem::new(&[("firm", "Raymond James"), ("name", "Pat Kim")])]),
    );
    let h = harness(FakeLauncher::new(destination.clone())).await;
    let acme = site("acme");
    h.ctx
        .snapshots
        .write(
            site_key(&acme),
            AnalystCommitteeLlm {
                committees: vec![],
                analysts: vec![
                    Analyst {
                        firm: "Raymond James".into(),
                        name: "Pat Kim".into(),
                        ..Analyst::default()
                    },
                    Analyst {
                        firm: "Stifel".into(),
                        name: "Lee Ortiz".into(),
                        phone: "555-0100".into(),
                        ..Analyst::default()
                    },
                ],
            },
        )
        .await
        .unwrap();

    let report = run_operation(&h.ctx, Operation::MigrateAnalysts, &acme).await.unwrap();

    assert_eq!((report.created, report.skipped, report.failed), (1, 1, 0));
    let analysts = destination.section(ContentSection::Analysts);
    assert_eq!(analysts.item_count(), 2);
    assert_eq!(analysts.items()[1].field("phone"), Some("555-0100"));
}

fn curated() -> AnalystCommitteeLlm {
    AnalystCommitteeLlm {
        committees: vec![LlmCommittee {
            name: "Audit".into(),
            description: "Oversees financial reporting.".into(),
            members: vec![LlmMember {
                name: "John Smith".into(),
                role: CommitteeRole::Chair,
            }],
        }],
        analysts: vec![],
    }
}

fn board_source() -> FakeAdmin {
    FakeAdmin::logged_in().with_section(
        ContentSection::Persons,
        FakeSection::grouped(vec![FakeGroup::new(
            "Board of Directors",
            vec![
                FakeItem::new(&[
                    ("first_name", "John A."),
                    ("last_name", "Smith"),
                    ("title", "Director"),
                    ("photo_url", "/files/john-smith.png"),
                ]),
                FakeItem::new(&[("first_name", "Ann"), ("last_name", "Lee")]),
            ],
        )]),
    )
}

#[tokio::test]
async fn governance_chain_creates_committees_persons_and_photos() {
    let destination = FakeAdmin::logged_in();
    let h = harness(source_and_destination(board_source(), destination.clone())).await;
    let acme = site("acme");

    run_operation(&h.ctx, Operation::ScrapePersons, &acme).await.unwrap();
    let persons = h
        .ctx
        .snapshots
        .read::<PersonsSnapshot>(site_key(&acme))
        .await
        .unwrap()
        .payload;
    assert_eq!(
        persons.departments[0].persons[0].photo_url.as_deref(),
        Some("https://acme-old.example/files/john-smith.png")
    );
    h.ctx.snapshots.write(site_key(&acme), curated()).await.unwrap();

    let report = run_operation(&h.ctx, Operation::MigrateGovernance, &acme)
        .await
        .unwrap();
    assert_eq!(report.operation, "migrate-governance");
    assert_eq!(report.failed, 0);

    let committees = destination.section(ContentSection::Committees);
    assert_eq!(committees.items()[0].field("name"), Some("Audit"));

    let merged = h
        .ctx
        .snapshots
        .read::<PersonsMergedSnapshot>(site_key(&acme))
        .await
        .unwrap()
        .payload;
    let john_match = merged.departments[0].persons[0].name_match.as_ref().unwrap();
    assert_eq!(john_match.kind, MatchKind::OrderedTokens);
    assert_eq!(john_match.confidence, 0.9);

    let board = destination.section(ContentSection::Persons);
    let board = board.group("Board of Directors").unwrap();
    assert_eq!(board.items.len(), 2);
    let john = &board.items[0];
    assert_eq!(john.field("title"), Some("Director"));
    assert_eq!(john.committees, vec!["Audit (Chair)".to_string()]);
    let photo = john.field("photo_url").unwrap();
    assert!(photo.starts_with("/files/") && photo.ends_with(".png"));
    assert!(board.items[1].field("photo_url").is_none());
    assert_eq!(
        h.photos.requests(),
        vec!["https://acme-old.example/files/john-smith.png".to_string()]
    );

    let state = h.ctx.state.site("acme").await;
    assert!(state.persons_captured && state.llm_complete && state.persons_merged);
    assert_eq!(state.operation_status, OperationStatus::Completed);

    // Photos already present are not uploaded twice.
    let rerun = run_operation(&h.ctx, Operation::MigratePersonImages, &acme)
        .await
        .unwrap();
    assert_eq!((rerun.created, rerun.skipped), (0, 2));
}

#[tokio::test]
async fn governance_chain_stops_at_the_first_failing_step() {
    let destination = FakeAdmin::logged_in();
    let h = harness(FakeLauncher::new(destination.clone())).await;

    let err = run_operation(&h.ctx, Operation::MigrateGovernance, &site("acme"))
        .await
        .unwrap_err();

    match &err {
        OperationError::Chain { step, source } => {
            assert_eq!(step, "migrate-committees");
            assert!(matches!(**source, OperationError::Data(_)));
        }
        other => panic!("expected a chain failure, got {other}"),
    }
    assert_eq!(destination.section(ContentSection::Persons).item_count(), 0);
    assert!(!h.ctx.state.site("acme").await.persons_merged);
}

#[tokio::test]
async fn governance_chain_stops_when_a_committee_is_not_created() {
    let destination = FakeAdmin::logged_in();
    let h = harness(source_and_destination(board_source(), destination.clone())).await;
    let acme = site("acme");

    run_operation(&h.ctx, Operation::ScrapePersons, &acme).await.unwrap();
    let mut llm = curated();
    llm.committees[0].name = String::new();
    h.ctx.snapshots.write(site_key(&acme), llm).await.unwrap();

    let err = run_operation(&h.ctx, Operation::MigrateGovernance, &acme)
        .await
        .unwrap_err();

    match &err {
        OperationError::Chain { step, source } => {
            assert_eq!(step, "migrate-committees");
            assert!(matches!(**source, OperationError::Incomplete { failed: 1, .. }));
        }
        other => panic!("expected a chain failure, got {other}"),
    }
    assert_eq!(destination.section(ContentSection::Committees).item_count(), 0);
    assert_eq!(destination.section(ContentSection::Persons).item_count(), 0);
    let state = h.ctx.state.site("acme").await;
    assert!(!state.persons_merged);
    assert_eq!(state.operation_status, OperationStatus::Failed);
}

#[tokio::test]
async fn merge_without_a_persons_snapshot_fails_with_a_data_error() {
    let h = harness(FakeLauncher::new(FakeAdmin::logged_in())).await;
    let acme = site("acme");
    h.ctx.snapshots.write(site_key(&acme), curated()).await.unwrap();

    let err = run_operation(&h.ctx, Operation::MergePersonData, &acme)
        .await
        .unwrap_err();
    assert!(matches!(err, OperationError::Data(_)));
    assert_eq!(
        h.ctx.state.site("acme").await.login_status,
        LoginStatus::NotStarted
    );
}

#[tokio::test]
async fn verify_login_marks_the_dashboard() {
    let destination = FakeAdmin::new("ops", "secret");
    let h = harness(FakeLauncher::new(destination.clone())).await;

    let report = run_operation(&h.ctx, Operation::VerifyLogin, &site("acme"))
        .await
        .unwrap();

    assert_eq!(report.notes, vec!["dashboard verified".to_string()]);
    let state = h.ctx.state.site("acme").await;
    assert_eq!(state.login_status, LoginStatus::LoggedIn);
    assert!(state.dashboard_verified);
    assert!(h.persistence.save_count().await >= 3);
    let saved = h.persistence.last_saved().await.unwrap();
    assert!(saved.sites["acme"].dashboard_verified);
}
