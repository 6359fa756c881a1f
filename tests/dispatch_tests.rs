mod common;

use common::{TestResult, cd_catalog, data_path, init_logging};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use xform::{Dispatcher, DispatcherBuilder, Error, ErrorKind, ExecutorImpl, ParameterList, SyncExecutor};

fn pool() -> Dispatcher {
    init_logging();
    DispatcherBuilder::new()
        .with_worker_count(4)
        .build()
        .expect("worker pool starts")
}

/// Collects callback results so a test can inspect them after `run`.
fn slot<T: Send + 'static>() -> (Arc<Mutex<Vec<T>>>, impl Fn(T) + Send + Clone + 'static) {
    let results = Arc::new(Mutex::new(Vec::new()));
    let sink = results.clone();
    (results, move |value| sink.lock().unwrap().push(value))
}

#[test]
fn test_cd_catalog_through_callbacks() -> TestResult {
    let dispatcher = pool();
    let (stylesheet, document) = cd_catalog();
    let (outputs, push) = slot::<Result<String, Error>>();
    dispatcher.transform(&stylesheet, &document, &ParameterList::new(), push);
    assert_eq!(dispatcher.run()?, 1);

    let outputs = outputs.lock().unwrap();
    let output = outputs[0].as_ref().map_err(|e| e.to_string())?;
    assert!(output.contains("<td>Bob Dylan</td>"));
    Ok(())
}

#[test]
fn test_each_callback_fires_exactly_once() -> TestResult {
    let dispatcher = pool();
    let calls = Arc::new(AtomicUsize::new(0));
    for i in 0..50 {
        let calls = calls.clone();
        let text = if i % 2 == 0 { format!("<n>{}</n>", i) } else { "<broken".to_string() };
        dispatcher.read_xml_string(text, move |result| {
            assert_eq!(result.is_ok(), i % 2 == 0);
            calls.fetch_add(1, Ordering::SeqCst);
        });
    }
    assert_eq!(dispatcher.run()?, 50);
    assert_eq!(calls.load(Ordering::SeqCst), 50);
    assert_eq!(dispatcher.outstanding(), 0);
    Ok(())
}

#[test]
fn test_callbacks_run_on_the_driving_thread() -> TestResult {
    let dispatcher = pool();
    let driver = thread::current().id();
    let (threads, push) = slot::<thread::ThreadId>();
    for _ in 0..8 {
        let push = push.clone();
        dispatcher.read_html_string("<p>x", move |_| push(thread::current().id()));
    }
    dispatcher.run()?;
    let threads = threads.lock().unwrap();
    assert_eq!(threads.len(), 8);
    assert!(threads.iter().all(|id| *id == driver));
    Ok(())
}

#[test]
fn test_errors_follow_the_blocking_taxonomy() -> TestResult {
    let dispatcher = pool();
    let (kinds, push) = slot::<(&'static str, Option<ErrorKind>)>();

    let p = push.clone();
    dispatcher.read_xml_file(data_path("missing.xml"), move |r| p(("xml file", r.err().map(|e| e.kind()))));
    let p = push.clone();
    dispatcher.read_xslt_file(data_path("not_xslt.xml"), move |r| p(("xslt", r.err().map(|e| e.kind()))));
    let p = push.clone();
    dispatcher.read_xslt_file(data_path("not_xml.txt"), move |r| p(("not xml", r.err().map(|e| e.kind()))));
    let p = push.clone();
    dispatcher.read_html_file(data_path("missing.html"), move |r| p(("html file", r.err().map(|e| e.kind()))));
    let p = push.clone();
    dispatcher.read_xslt_string(
        std::fs::read_to_string(data_path("cdcatalog.xsl"))?,
        move |r| p(("valid", r.err().map(|e| e.kind()))),
    );
    dispatcher.run()?;

    let mut kinds = kinds.lock().unwrap().clone();
    kinds.sort();
    assert_eq!(
        kinds,
        vec![
            ("html file", Some(ErrorKind::HtmlParse)),
            ("not xml", Some(ErrorKind::XmlParse)),
            ("valid", None),
            ("xml file", Some(ErrorKind::XmlParse)),
            ("xslt", Some(ErrorKind::XsltParse)),
        ]
    );
    Ok(())
}

#[test]
fn test_terminate_fails_in_non_blocking_mode() -> TestResult {
    let dispatcher = pool();
    let stylesheet = xform::read_xslt_file(data_path("terminate.xsl"))?;
    let document = xform::read_xml_string("<r/>")?;
    let err = dispatcher
        .transform_pending(&stylesheet, &document, &ParameterList::new())
        .wait()
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transform);
    Ok(())
}

#[test]
fn test_handles_outlive_in_flight_work() -> TestResult {
    let dispatcher = pool();
    let (stylesheet, document) = cd_catalog();
    let pending = dispatcher.transform_pending(&stylesheet, &document, &ParameterList::new());
    drop(stylesheet);
    drop(document);
    assert!(pending.wait()?.contains("<td>Bob Dylan</td>"));
    Ok(())
}

#[test]
fn test_transform_all_keeps_input_order() -> TestResult {
    let dispatcher = pool();
    let stylesheet = xform::read_xslt_file(data_path("greeting.xsl"))?;
    let documents = ["alpha", "beta", "gamma", "delta"]
        .iter()
        .map(|name| xform::read_xml_string(&format!("<{}/>", name)))
        .collect::<Result<Vec<_>, _>>()?;
    let params = ParameterList::new().with_string("greeting", "Hi");
    let outputs = dispatcher
        .transform_all(&stylesheet, &documents, &params)
        .into_iter()
        .collect::<Result<Vec<_>, _>>()?;
    assert_eq!(outputs, vec!["Hi, alpha.", "Hi, beta.", "Hi, gamma.", "Hi, delta."]);
    Ok(())
}

#[test]
fn test_inline_executor_still_defers_callbacks() -> TestResult {
    let dispatcher = DispatcherBuilder::new()
        .with_executor(ExecutorImpl::Sync(SyncExecutor::new()))
        .build()?;
    let (docs, push) = slot::<Option<String>>();
    dispatcher.read_xml_file(data_path("cdcatalog.xml"), move |r: Result<xform::XmlDocument, Error>| {
        push(r.map(|d| d.root_name().map(str::to_string)).ok().flatten())
    });
    assert!(docs.lock().unwrap().is_empty());
    dispatcher.run()?;
    assert_eq!(*docs.lock().unwrap(), vec![Some("catalog".to_string())]);
    Ok(())
}

#[tokio::test]
async fn test_pending_operations_can_be_awaited() -> TestResult {
    let dispatcher = pool();
    let stylesheet = dispatcher.read_xslt_file_pending(data_path("cdcatalog.xsl")).join().await?;
    let document = dispatcher.read_xml_file_pending(data_path("cdcatalog.xml")).join().await?;
    let output = dispatcher
        .transform_pending(&stylesheet, &document, &ParameterList::new())
        .join()
        .await?;
    assert!(output.contains("<td>Bob Dylan</td>"));

    let err = dispatcher
        .read_xml_file_pending(data_path("missing.xml"))
        .join()
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::XmlParse);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_many_concurrent_transforms() -> TestResult {
    let dispatcher = pool();
    let stylesheet = xform::read_xslt_file(data_path("greeting.xsl"))?;
    let mut pending = Vec::new();
    for i in 0..20 {
        let document = dispatcher.read_xml_string_pending(format!("<doc{}/>", i)).join().await?;
        pending.push(dispatcher.transform_pending(&stylesheet, &document, &ParameterList::new()));
    }
    for (i, p) in pending.into_iter().enumerate() {
        assert_eq!(p.join().await?, format!("Hello, doc{}.", i));
    }
    Ok(())
}
