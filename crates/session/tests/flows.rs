// End-to-end flows through the service on a three-sheet workbook.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rust_xlsxwriter::{Format, Workbook as XlsxWorkbook};
use sheetwright_config::Settings;
use sheetwright_engine::{execute, CancelToken, CellValue};
use sheetwright_intent::{ClassifyError, IntentClassifier, Template, TemplateMatch};
use sheetwright_io::read_workbook;
use sheetwright_protocol::{
    Answer, DerivedExpr, ErrorKind, Operation, Reply, TransformationPlan, Turn, FALLBACK_MESSAGE,
};
use sheetwright_session::{ConversationState, CoreError, ManualClock, Service};

const T: &str = "tenant-a";

fn fixture() -> Vec<u8> {
    let mut wb = XlsxWorkbook::new();
    let date = Format::new().set_num_format("yyyy-mm-dd");

    let tx = wb.add_worksheet().set_name("Transactions").unwrap();
    for (c, h) in ["Date", "Description", "Category", "Revenue", "Spend"].iter().enumerate() {
        tx.write_string(0, c as u16, *h).unwrap();
    }
    let rows: [(f64, &str, &str, f64, f64); 4] = [
        (45296.0, "Launch", "Ads", 1200.0, 300.0),
        (45311.0, "Promo", "Ads", 800.0, 400.0),
        (45324.0, "Renewal", "Subscriptions", 500.0, 250.0),
        (45336.0, "Refund", "Subscriptions", -50.0, 10.0),
    ];
    for (i, (d, desc, cat, rev, spend)) in rows.iter().enumerate() {
        let r = i as u32 + 1;
        tx.write_number_with_format(r, 0, *d, &date).unwrap();
        tx.write_string(r, 1, *desc).unwrap();
        tx.write_string(r, 2, *cat).unwrap();
        tx.write_number(r, 3, *rev).unwrap();
        tx.write_number(r, 4, *spend).unwrap();
    }

    let cd = wb.add_worksheet().set_name("Campaign_Data").unwrap();
    for (c, h) in ["Campaign_ID", "Channel", "Spend", "Acquisitions"].iter().enumerate() {
        cd.write_string(0, c as u16, *h).unwrap();
    }
    for (i, (id, channel, spend, acq)) in
        [("C-1", "Email", 100.0, 4.0), ("C-2", "Social", 250.0, 5.0), ("C-3", "Email", 75.0, 3.0)]
            .iter()
            .enumerate()
    {
        let r = i as u32 + 1;
        cd.write_string(r, 0, *id).unwrap();
        cd.write_string(r, 1, *channel).unwrap();
        cd.write_number(r, 2, *spend).unwrap();
        cd.write_number(r, 3, *acq).unwrap();
    }

    let targets = wb.add_worksheet().set_name("Targets").unwrap();
    targets.write_string(0, 0, "Metric_Name").unwrap();
    targets.write_string(0, 1, "Value").unwrap();
    targets.write_string(1, 0, "Revenue").unwrap();
    targets.write_number(1, 1, 5000).unwrap();
    targets.write_string(2, 0, "CPA").unwrap();
    targets.write_number(2, 1, 40).unwrap();

    wb.save_to_buffer().unwrap()
}

fn service() -> (Service, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::default());
    let svc = Service::new(Settings::default()).unwrap().with_clock(clock.clone());
    (svc, clock)
}

fn text(step: u64, s: &str) -> Option<Turn> {
    Some(Turn { step, answer: Answer::FreeText(s.to_string()) })
}

struct NeverSure;

impl IntentClassifier for NeverSure {
    fn classify(&self, _: &str, templates: &[Template]) -> Result<Vec<TemplateMatch>, ClassifyError> {
        Ok(templates.iter().map(|t| TemplateMatch { template_id: t.id.clone(), confidence: 0.3 }).collect())
    }
}

struct Sleepy;

impl IntentClassifier for Sleepy {
    fn classify(&self, _: &str, templates: &[Template]) -> Result<Vec<TemplateMatch>, ClassifyError> {
        thread::sleep(Duration::from_millis(300));
        Ok(templates.iter().map(|t| TemplateMatch { template_id: t.id.clone(), confidence: 1.0 }).collect())
    }
}

#[test]
fn profit_margin_conversation_end_to_end() {
    let (svc, _) = service();
    let ing = svc.ingest(T, fixture()).unwrap();
    assert_eq!(ing.analysis.sheets.len(), 3);

    match svc.converse(T, &ing.handle, None).unwrap() {
        Reply::Question { step: 1, question, .. } => assert_eq!(question.id, "derive:Transactions:Profit_Margin"),
        other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(
        svc.converse(T, &ing.handle, text(1, "add a profit margin column")).unwrap(),
        Reply::Question { step: 2, .. }
    ));
    match svc.converse(T, &ing.handle, text(2, "done")).unwrap() {
        Reply::ReadyToCompile { step: 3, summary } => {
            assert_eq!(summary.answered, 0);
            assert_eq!(summary.intents, vec!["derive:Transactions:Profit_Margin".to_string()]);
        }
        other => panic!("unexpected {other:?}"),
    }

    let done = svc.finalize(T, &ing.handle, &CancelToken::new()).unwrap();
    assert_eq!(
        done.plan.operations(),
        &[Operation::AddColumn {
            sheet: "Transactions".into(),
            name: "Profit_Margin".into(),
            expr: DerivedExpr::Ratio { numerator: "Revenue".into(), denominator: "Spend".into() },
        }]
    );
    assert_eq!(done.artifact.sheets[0].before, Some(4));
    assert_eq!(done.artifact.sheets[0].after, 4);

    let first = svc.download(T, &done.artifact.handle).unwrap();
    let second = svc.download(T, &done.artifact.handle).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.len(), done.artifact.size_bytes);

    let out = read_workbook(&first, "unused").unwrap();
    let tx = out.sheet("Transactions").unwrap();
    let col = tx.column_index("Profit_Margin").unwrap();
    assert_eq!(tx.cell(0, col), &CellValue::Number(4.0));

    // conversation is gone; a new one may start
    assert_eq!(svc.conversation_state(T, &ing.handle).unwrap(), None);
    assert!(matches!(svc.converse(T, &ing.handle, None).unwrap(), Reply::Question { step: 1, .. }));
}

/// Sales sheet whose quarter column is literally named "month".
fn sales_fixture() -> Vec<u8> {
    let mut wb = XlsxWorkbook::new();
    let date = Format::new().set_num_format("yyyy-mm-dd");
    let sales = wb.add_worksheet().set_name("Sales").unwrap();
    for (c, h) in ["Date", "month", "Amount"].iter().enumerate() {
        sales.write_string(0, c as u16, *h).unwrap();
    }
    let rows: [(f64, &str, f64); 4] =
        [(45296.0, "Q1", 100.0), (45311.0, "Q1", 50.0), (45325.0, "Q1", 30.0), (45393.0, "Q2", 20.0)];
    for (i, (d, quarter, amount)) in rows.iter().enumerate() {
        let r = i as u32 + 1;
        sales.write_number_with_format(r, 0, *d, &date).unwrap();
        sales.write_string(r, 1, *quarter).unwrap();
        sales.write_number(r, 2, *amount).unwrap();
    }
    wb.save_to_buffer().unwrap()
}

#[test]
fn monthly_summary_beside_a_month_named_column() {
    let (svc, _) = service();
    let ing = svc.ingest(T, sales_fixture()).unwrap();

    match svc.converse(T, &ing.handle, None).unwrap() {
        Reply::Question { step: 1, question, .. } => assert_eq!(question.id, "derive:Sales:Amount_Percentage"),
        other => panic!("unexpected {other:?}"),
    }
    match svc.converse(T, &ing.handle, Some(Turn { step: 1, answer: Answer::YesNo(false) })).unwrap() {
        Reply::Question { step: 2, question, .. } => assert_eq!(question.id, "summarize:Sales"),
        other => panic!("unexpected {other:?}"),
    }
    svc.converse(T, &ing.handle, Some(Turn { step: 2, answer: Answer::Choice("option_1".into()) })).unwrap();
    assert!(matches!(svc.converse(T, &ing.handle, text(3, "done")).unwrap(), Reply::ReadyToCompile { .. }));

    let done = svc.finalize(T, &ing.handle, &CancelToken::new()).unwrap();
    match done.plan.operations() {
        [Operation::AddColumn { name, .. }, Operation::Aggregate { group_by, target, .. }] => {
            assert_eq!(name, "Month_2");
            assert_eq!(group_by, "Month_2");
            assert_eq!(target, "Sales_Monthly");
        }
        other => panic!("unexpected {other:?}"),
    }

    let out = read_workbook(&svc.download(T, &done.artifact.handle).unwrap(), "unused").unwrap();
    let monthly = out.sheet("Sales_Monthly").unwrap();
    // January, February, April rather than two quarters
    assert_eq!(monthly.row_count(), 3);
    assert_eq!(monthly.cell(0, 1), &CellValue::Number(150.0));
}

#[test]
fn merge_without_matching_keys_null_fills() {
    let source = read_workbook(&fixture(), "unused").unwrap();
    let plan = TransformationPlan::new(
        vec![Operation::Merge {
            left: "Campaign_Data".into(),
            right: "Targets".into(),
            left_key: "Campaign_ID".into(),
            right_key: "Metric_Name".into(),
            target: "Campaign_Targets".into(),
        }],
        Vec::new(),
    );

    let out = execute(&source, &plan, &CancelToken::new()).unwrap();
    assert_eq!(out.merges[0].unmatched_count, 3);
    let joined = out.workbook.sheet("Campaign_Targets").unwrap();
    assert_eq!(joined.row_count(), 3);
    let value = joined.column_index("Value").unwrap();
    assert!(joined.column(value).all(|v| v == &CellValue::Empty));
}

#[test]
fn empty_requirements_reproduce_the_source() {
    let (svc, _) = service();
    let ing = svc.ingest(T, fixture()).unwrap();
    svc.converse(T, &ing.handle, None).unwrap();
    svc.converse(T, &ing.handle, text(1, "done")).unwrap();

    let done = svc.finalize(T, &ing.handle, &CancelToken::new()).unwrap();
    assert!(done.plan.is_empty());

    let source = read_workbook(&fixture(), "unused").unwrap();
    let out = read_workbook(&svc.download(T, &done.artifact.handle).unwrap(), "unused").unwrap();
    assert_eq!(out.fingerprint(), source.fingerprint());
}

#[test]
fn three_unmatched_utterances_fall_back() {
    let (svc, _) = service();
    let svc = svc.with_classifier(Arc::new(NeverSure));
    let ing = svc.ingest(T, fixture()).unwrap();
    svc.converse(T, &ing.handle, None).unwrap();

    for _ in 0..2 {
        match svc.converse(T, &ing.handle, text(1, "give me a summary by month")).unwrap() {
            Reply::Question { step: 1, notice: Some(_), .. } => {}
            other => panic!("unexpected {other:?}"),
        }
    }
    match svc.converse(T, &ing.handle, text(1, "give me a summary by month")).unwrap() {
        Reply::Fallback { message, .. } => assert_eq!(message, FALLBACK_MESSAGE),
        other => panic!("unexpected {other:?}"),
    }

    let done = svc.finalize(T, &ing.handle, &CancelToken::new()).unwrap();
    assert!(done.plan.is_fallback());
    assert!(done.plan.is_empty());
    assert_eq!(done.artifact.log, vec![FALLBACK_MESSAGE.to_string()]);
}

#[test]
fn classifier_timeout_counts_as_no_match() {
    let settings = Settings { classifier_timeout_ms: 20, ..Settings::default() };
    let svc = Service::new(settings).unwrap().with_classifier(Arc::new(Sleepy));
    let ing = svc.ingest(T, fixture()).unwrap();
    svc.converse(T, &ing.handle, None).unwrap();

    match svc.converse(T, &ing.handle, text(1, "add a profit margin column")).unwrap() {
        Reply::Question { step, notice, .. } => {
            assert_eq!(step, 1);
            assert!(notice.is_some());
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn stale_steps_are_rejected_without_mutation() {
    let (svc, _) = service();
    let ing = svc.ingest(T, fixture()).unwrap();
    svc.converse(T, &ing.handle, None).unwrap();
    svc.converse(T, &ing.handle, Some(Turn { step: 1, answer: Answer::YesNo(true) })).unwrap();

    let err = svc.converse(T, &ing.handle, Some(Turn { step: 1, answer: Answer::YesNo(true) })).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StaleConversationStep);

    // still at step 2
    assert!(matches!(
        svc.converse(T, &ing.handle, Some(Turn { step: 2, answer: Answer::YesNo(false) })).unwrap(),
        Reply::Question { step: 3, .. }
    ));
}

#[test]
fn expired_artifact_is_reported_as_expired() {
    let (svc, clock) = service();
    let ing = svc.ingest(T, fixture()).unwrap();
    svc.converse(T, &ing.handle, None).unwrap();
    svc.converse(T, &ing.handle, text(1, "done")).unwrap();
    let done = svc.finalize(T, &ing.handle, &CancelToken::new()).unwrap();

    clock.advance(Duration::from_secs(86_400));
    let err = svc.download(T, &done.artifact.handle).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ArtifactExpired);
}

#[test]
fn cancelled_execution_returns_to_ready() {
    let (svc, _) = service();
    let ing = svc.ingest(T, fixture()).unwrap();
    svc.converse(T, &ing.handle, None).unwrap();
    svc.converse(T, &ing.handle, Some(Turn { step: 1, answer: Answer::YesNo(true) })).unwrap();
    svc.converse(T, &ing.handle, text(2, "done")).unwrap();

    let cancelled = CancelToken::new();
    cancelled.cancel();
    let err = svc.finalize(T, &ing.handle, &cancelled).unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(err.to_body().operation_index, Some(0));
    assert_eq!(
        svc.conversation_state(T, &ing.handle).unwrap(),
        Some(ConversationState::ReadyToCompile)
    );

    let done = svc.finalize(T, &ing.handle, &CancelToken::new()).unwrap();
    assert_eq!(done.plan.len(), 1);
}

#[test]
fn explicit_cancel_abandons_conversation() {
    let (svc, _) = service();
    let ing = svc.ingest(T, fixture()).unwrap();
    svc.converse(T, &ing.handle, None).unwrap();
    assert!(svc.cancel(T, &ing.handle).unwrap());
    assert!(!svc.cancel(T, &ing.handle).unwrap());

    assert_eq!(
        svc.converse(T, &ing.handle, Some(Turn { step: 1, answer: Answer::YesNo(true) })).unwrap(),
        Reply::Abandoned { handle: ing.handle.clone() }
    );
    // a fresh conversation may start
    assert!(matches!(svc.converse(T, &ing.handle, None).unwrap(), Reply::Question { step: 1, .. }));
}

#[test]
fn ingest_errors() {
    let (svc, _) = service();
    let err = svc.ingest(T, vec![0, 1, 2, 3, 0xff]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidWorkbook);
    assert_eq!(svc.ingest(T, b"a,b,c\n".to_vec()).unwrap_err(), CoreError::EmptyDataset);

    let body = serde_json::to_value(err.to_body()).unwrap();
    assert_eq!(body["kind"], "invalid_workbook");
}

#[test]
fn distinct_handles_run_in_parallel() {
    let (svc, _) = service();
    let bytes = fixture();

    let results: Vec<String> = thread::scope(|s| {
        let workers: Vec<_> = (0..4)
            .map(|i| {
                let svc = &svc;
                let bytes = bytes.clone();
                s.spawn(move || {
                    let tenant = format!("tenant-{i}");
                    let ing = svc.ingest(&tenant, bytes).unwrap();
                    svc.converse(&tenant, &ing.handle, None).unwrap();
                    svc.converse(&tenant, &ing.handle, Some(Turn { step: 1, answer: Answer::YesNo(true) }))
                        .unwrap();
                    svc.converse(&tenant, &ing.handle, text(2, "done")).unwrap();
                    let done = svc.finalize(&tenant, &ing.handle, &CancelToken::new()).unwrap();
                    let bytes = svc.download(&tenant, &done.artifact.handle).unwrap();
                    read_workbook(&bytes, "unused").unwrap().fingerprint()
                })
            })
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    // identical inputs, identical results
    assert_eq!(results.len(), 4);
    assert!(results.windows(2).all(|w| w[0] == w[1]));
}
