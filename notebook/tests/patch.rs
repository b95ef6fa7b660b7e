use notebook::patch::{PatchError, patch};
use notebook::results::{EvalResult, RenderError};
use notebook::scan;
use pulldown_cmark::{Event, Options, Parser, Tag};

fn result_for(doc: &str, name: &str, output: &str) -> EvalResult {
    let block = scan(doc)
        .into_iter()
        .find(|b| b.name() == Some(name))
        .expect("block in document");
    EvalResult {
        block,
        output: output.to_string(),
        error: None,
    }
}

fn patched(doc: &str, name: &str, output: &str) -> String {
    let result = result_for(doc, name, output);
    patch(doc, &[result]).expect("patch").text
}

const HELLO: &str = "# Demo\n\n<eval name=\"hello\" />\n```bash\necho \"Hello, jot!\"\n```\n";

#[test]
fn code_result_follows_block_after_one_blank_line() {
    let out = patched(HELLO, "hello", "Hello, jot!\n");
    assert_eq!(
        out,
        "# Demo\n\n<eval name=\"hello\" />\n```bash\necho \"Hello, jot!\"\n```\n\n```\nHello, jot!\n```\n\n<!-- /jot:result -->\n"
    );
}

#[test]
fn replace_is_idempotent() {
    let once = patched(HELLO, "hello", "Hello, jot!\n");
    let twice = patched(&once, "hello", "Hello, jot!\n");
    assert_eq!(once, twice);
}

#[test]
fn replace_swaps_previous_output() {
    let once = patched(HELLO, "hello", "first\n");
    let twice = patched(&once, "hello", "second\n");
    assert!(twice.contains("second"));
    assert!(!twice.contains("first"));
}

#[test]
fn replace_preserves_following_content() {
    let doc = format!("{}\n\n\nAfter the block.\n", HELLO.trim_end());
    let once = patched(&doc, "hello", "Hello, jot!\n");
    assert!(once.ends_with("```\nHello, jot!\n```\n\n<!-- /jot:result -->\n\nAfter the block.\n"));
    assert_eq!(patched(&once, "hello", "Hello, jot!\n"), once);
}

#[test]
fn language_fence_after_block_is_not_a_result() {
    let doc = "<eval name=\"a\" />\n```sh\necho a\n```\n```python\nprint(2)\n```\n";
    let out = patched(doc, "a", "a\n");
    assert!(out.contains("```python\nprint(2)\n```"));
    assert!(out.contains("echo a\n```\n\n```\na\n```\n\n<!-- /jot:result -->\n\n```python"));
}

#[test]
fn table_result() {
    let doc = "<eval name=\"people\" results=\"table\" />\n```bash\necho \"Name,Age\"\necho \"Ann,30\"\n```\n";
    let out = patched(doc, "people", "Name,Age\nAnn,30\n");
    assert!(out.ends_with("```\n\n| Name | Age |\n|---|---|\n| Ann | 30 |\n\n<!-- /jot:result -->\n"));

    let region = out.split("```\n\n").last().expect("region");
    let mut in_table = false;
    for event in Parser::new_ext(region, Options::ENABLE_TABLES) {
        if let Event::Start(Tag::Table(_)) = event {
            in_table = true;
        }
    }
    assert!(in_table, "result should parse as a table: {}", region);
    assert_eq!(patched(&out, "people", "Name,Age\nAnn,30\n"), out);
}

#[test]
fn tab_and_pipe_delimited_tables() {
    let doc = "<eval name=\"t\" results=\"table\" />\n```sh\ncat data\n```\n";
    let out = patched(doc, "t", "a\tb\n1\t2\n");
    assert!(out.contains("| a | b |\n|---|---|\n| 1 | 2 |"));
    let out = patched(doc, "t", "| x | y |\n| 3 | 4 |\n");
    assert!(out.contains("| x | y |\n|---|---|\n| 3 | 4 |"));
}

#[test]
fn list_result_is_idempotent() {
    let doc = "<eval name=\"l\" results=\"list\" />\n```sh\nls\n```\n\nTrailing paragraph.\n";
    let once = patched(doc, "l", "one\ntwo\n\n");
    assert!(once.contains("```\n\n- one\n- two\n\n<!-- /jot:result -->\n\nTrailing paragraph.\n"));
    assert_eq!(patched(&once, "l", "one\ntwo\n"), once);
}

#[test]
fn append_keeps_earlier_results() {
    let doc = "<eval name=\"log\" results=\"append\" />\n```sh\ndate\n```\n";
    let once = patched(doc, "log", "first\n");
    let twice = patched(&once, "log", "second\n");
    let first = twice.find("first").expect("first kept");
    let second = twice.find("second").expect("second added");
    assert!(first < second);
    assert!(twice.contains("```\nfirst\n```\n\n<!-- /jot:result -->\n\n```\nsecond\n```\n\n<!-- /jot:result -->\n"));
}

#[test]
fn prepend_inserts_before_earlier_results() {
    let doc = "<eval name=\"log\" results=\"prepend\" />\n```sh\ndate\n```\n";
    let once = patched(doc, "log", "first\n");
    let twice = patched(&once, "log", "second\n");
    assert!(twice.find("second").expect("second") < twice.find("first").expect("first"));
}

#[test]
fn raw_result_round_trips() {
    let doc = "<eval name=\"md\" results=\"raw\" />\n```sh\necho '**bold**'\n```\n\n## Next\n";
    let once = patched(doc, "md", "**bold**\n\nmore\n");
    assert!(once.contains("<!-- jot:result -->\n**bold**\n\nmore\n<!-- /jot:result -->\n\n## Next"));
    assert_eq!(patched(&once, "md", "**bold**\n\nmore\n"), once);
}

#[test]
fn file_result_links_and_attaches() {
    let doc = "<eval name=\"plot\" results=\"file\" file=\"plot.png\" />\n```python\nplot()\n```\n";
    let result = result_for(doc, "plot", "PNGDATA");
    let patched = patch(doc, &[result]).expect("patch");
    assert!(patched.text.ends_with("```\n\n![plot](plot.png)\n\n<!-- /jot:result -->\n"));
    assert_eq!(patched.attachments.len(), 1);
    assert_eq!(patched.attachments[0].contents, "PNGDATA");

    let again = patch(&patched.text, &[result_for(&patched.text, "plot", "PNGDATA")]).expect("patch");
    assert_eq!(again.text, patched.text);
}

#[test]
fn file_result_defaults_to_name() {
    let doc = "<eval name=\"report\" results=\"file\" />\n```sh\necho hi\n```\n";
    let result = result_for(doc, "report", "hi\n");
    let patched = patch(doc, &[result]).expect("patch");
    assert!(patched.text.contains("[report](report.txt)"));
    assert_eq!(patched.attachments[0].path.to_string_lossy(), "report.txt");
}

#[test]
fn silent_and_none_leave_document_untouched() {
    for mode in ["silent", "none"] {
        let doc = format!("<eval name=\"q\" results=\"{}\" />\n```sh\necho q\n```\n", mode);
        let result = result_for(&doc, "q", "q\n");
        let patched = patch(&doc, &[result]).expect("patch");
        assert_eq!(patched.text, doc);
        assert_eq!(patched.applied, 0);
    }
}

#[test]
fn errors_render_as_code_with_trailer() {
    let doc = "<eval name=\"bad\" results=\"table\" />\n```sh\nexit 3\n```\n";
    let mut result = result_for(doc, "bad", "partial\n");
    result.error = Some("exited with status 3".into());
    let out = patch(doc, &[result]).expect("patch").text;
    assert!(out.ends_with("```\n\n```\npartial\nerror: exited with status 3\n```\n\n<!-- /jot:result -->\n"));
}

#[test]
fn several_results_patch_in_one_pass() {
    let doc = "<eval name=\"a\" />\n```sh\necho a\n```\n\n<eval name=\"b\" />\n```sh\necho b\n```\n";
    let results = vec![result_for(doc, "a", "A\n"), result_for(doc, "b", "B\n")];
    let once = patch(doc, &results).expect("patch").text;
    assert_eq!(
        once,
        "<eval name=\"a\" />\n```sh\necho a\n```\n\n```\nA\n```\n\n<!-- /jot:result -->\n\n<eval name=\"b\" />\n```sh\necho b\n```\n\n```\nB\n```\n\n<!-- /jot:result -->\n"
    );
    let results = vec![result_for(&once, "a", "A\n"), result_for(&once, "b", "B\n")];
    assert_eq!(patch(&once, &results).expect("patch").text, once);
}

#[test]
fn output_with_backticks_gets_longer_fence() {
    let out = patched(HELLO, "hello", "```\ninner\n```\n");
    assert!(out.contains("````\n```\ninner\n```\n````\n"));
    assert_eq!(patched(&out, "hello", "```\ninner\n```\n"), out);
}

#[test]
fn missing_anchor_is_an_error() {
    let result = result_for(HELLO, "hello", "x");
    let err = patch("# Nothing here\n", &[result]).unwrap_err();
    assert!(matches!(err, PatchError::AnchorNotFound { .. }));
}

#[test]
fn user_markdown_after_block_is_kept() {
    let doc = "<eval name=\"a\" />\n```bash\necho hi\n```\n- my todo item\n- another\n\n[docs](https://example.com)\n\n```text\nnotes\n```\n\n| k | v |\n|---|---|\n| 1 | 2 |\n\nTrailing prose.\n";
    let user = &doc[doc.find("- my todo").expect("list")..];

    let once = patched(doc, "a", "hi\n");
    assert!(once.starts_with("<eval name=\"a\" />\n```bash\necho hi\n```\n\n```\nhi\n```\n\n<!-- /jot:result -->\n\n"));
    assert!(once.ends_with(user), "user content changed:\n{}", once);

    let twice = patched(&once, "a", "bye\n");
    assert!(twice.contains("```\nbye\n```"));
    assert!(!twice.contains("```\nhi\n```"));
    assert!(twice.ends_with(user), "user content changed:\n{}", twice);
    assert_eq!(patched(&twice, "a", "bye\n"), twice);
}

#[test]
fn raw_html_output_is_idempotent() {
    let doc = "<eval name=\"h\" results=\"raw\" />\n```sh\necho '<div>hi</div>'\n```\n\nAfter.\n";
    let once = patched(doc, "h", "<div>hi</div>\n");
    assert!(once.contains("<!-- jot:result -->\n<div>hi</div>\n<!-- /jot:result -->\n\nAfter.\n"));
    let twice = patched(&once, "h", "<div>hi</div>\n");
    assert_eq!(twice, once);
    assert_eq!(twice.matches("<!-- jot:result -->").count(), 1);
}

#[test]
fn raw_reference_definitions_are_idempotent() {
    let doc = "<eval name=\"r\" results=\"raw\" />\n```sh\ncat refs.md\n```\n";
    let output = "see [x]\n\n[x]: https://example.com\n";
    let once = patched(doc, "r", output);
    let twice = patched(&once, "r", output);
    assert_eq!(twice, once);
    assert_eq!(twice.matches("<!-- jot:result -->").count(), 1);
}

#[test]
fn end_marker_inside_output_does_not_cut_the_region() {
    let doc = "<eval name=\"m\" />\n```sh\ncat notes.md\n```\n";
    let output = "<!-- /jot:result -->\nafter\n";
    let once = patched(doc, "m", output);
    assert_eq!(patched(&once, "m", output), once);

    let raw_doc = "<eval name=\"m\" results=\"raw\" />\n```sh\ncat notes.md\n```\n";
    let once = patched(raw_doc, "m", output);
    assert_eq!(once.matches("<!-- /jot:result -->").count(), 1);
    assert_eq!(patched(&once, "m", output), once);
}

#[test]
fn crlf_line_endings_are_preserved() {
    let doc = "# Title\r\n\r\nintro line\r\n\r\n<eval name=\"a\" />\r\n```sh\r\necho hi\r\n```\r\n\r\nAfter.\r\n";
    let once = patched(doc, "a", "hi\n");
    assert_eq!(
        once,
        "# Title\r\n\r\nintro line\r\n\r\n<eval name=\"a\" />\r\n```sh\r\necho hi\r\n```\r\n\r\n```\r\nhi\r\n```\r\n\r\n<!-- /jot:result -->\r\n\r\nAfter.\r\n"
    );
    assert_eq!(patched(&once, "a", "hi\n"), once);
}

#[test]
fn mixed_line_endings_outside_the_result_are_untouched() {
    let doc = "intro\r\n<eval name=\"a\" />\n```sh\necho hi\n```\n\nafter\r\n";
    let once = patched(doc, "a", "hi\n");
    assert!(once.starts_with("intro\r\n<eval"));
    assert!(once.ends_with("\n\nafter\r\n"));
}

#[test]
fn file_target_must_stay_next_to_the_document() {
    for target in ["../up.txt", "/etc/passwd", "a/../../up.txt"] {
        let doc = format!(
            "<eval name=\"f\" results=\"file\" file=\"{}\" />\n```sh\necho x\n```\n",
            target
        );
        let err = patch(&doc, &[result_for(&doc, "f", "x\n")]).unwrap_err();
        assert!(
            matches!(err, PatchError::Render(RenderError::UnsafeFileTarget { .. })),
            "{}: {:?}",
            target,
            err
        );
    }

    let doc = "<eval name=\"f\" results=\"file\" file=\"out/./a/../b.txt\" />\n```sh\necho x\n```\n";
    let patched = patch(doc, &[result_for(doc, "f", "x\n")]).expect("patch");
    assert_eq!(patched.attachments[0].path.to_string_lossy(), "out/./a/../b.txt");
}
