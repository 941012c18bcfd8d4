/*
 * integration_tests.rs
 * Copyright (c) 2025 Posit, PBC
 *
 * Integration tests for quarto-luatemplate using test fixtures.
 */

use pretty_assertions::assert_eq;
use quarto_luatemplate::{
    Chunk, CompiledTemplate, Environment, TemplateError, TemplateOptions, TrimPolicy, compile,
    compile_file, get_dependencies, lex, precompile, render, run,
};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};

/// Helper to get the path to test fixtures
fn fixture_path(name: &str) -> PathBuf {
    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    Path::new(manifest_dir).join("test-fixtures").join(name)
}

/// Helper to compile a template from fixtures with default options
fn load_template(name: &str) -> CompiledTemplate {
    let path = fixture_path(name);
    compile_file(&path, &TemplateOptions::default())
        .unwrap_or_else(|e| panic!("Failed to load template {}: {}", name, e))
}

#[test]
fn test_hello_world() {
    let template = load_template("hello.tpl");

    let mut env = Environment::new();
    env.insert("name", "World");

    assert_eq!(render(&template, &env).unwrap(), "Hello World!");
}

#[test]
fn test_loop_lines_disappear_under_code_trimming() {
    let template = load_template("list.tpl");

    let mut env = Environment::new();
    env.insert("items", json!(["a", "b"]));

    assert_eq!(
        render(&template, &env).unwrap(),
        "<ul>\n  <li>a</li>\n  <li>b</li>\n</ul>\n"
    );
}

#[test]
fn test_nested_include_relative_to_file() {
    let template = load_template("page.tpl");

    let env = Environment::from_json(&json!({ "title": "Intro", "body": "Text" })).unwrap();

    assert_eq!(render(&template, &env).unwrap(), "# Intro\n\nText\n");
}

#[test]
fn test_template_without_directives_is_one_chunk() {
    let options = TemplateOptions::default();
    let text = "no directives here,\njust } and # and {";

    assert_eq!(lex(text, &options).unwrap(), vec![Chunk::text(text)]);
    assert!(lex("", &options).unwrap().is_empty());
}

#[test]
fn test_precompile_round_trips_under_any_trim_policy() {
    let text = "a\n  #{ x = 1 }#\nb #{= x }# c\n#{- y = 2 -}#\nd #{+ z = 3 +}# e #{ = w }#";

    for policy in [TrimPolicy::None, TrimPolicy::All, TrimPolicy::CodeOnly] {
        let options = TemplateOptions::default().with_trim(policy, policy);
        assert_eq!(precompile(text, &options).unwrap(), text);
    }
}

#[test]
fn test_include_cycle_is_rejected() {
    let path = fixture_path("cycle/a.tpl");
    let err = compile_file(&path, &TemplateOptions::default()).unwrap_err();

    match err {
        TemplateError::CyclicInclude { path: revisited, chain } => {
            assert_eq!(revisited, fixture_path("cycle/a.tpl"));
            assert_eq!(
                chain,
                vec![fixture_path("cycle/a.tpl"), fixture_path("cycle/b.tpl")]
            );
        }
        other => panic!("expected a cyclic include error, got {:?}", other),
    }
}

#[test]
fn test_include_cycle_through_parent_dir() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("sub")).unwrap();
    let path = dir.path().join("sub/a.tpl");
    fs::write(&path, "x#{include: '../sub/a.tpl' }#").unwrap();

    let err = compile_file(&path, &TemplateOptions::default()).unwrap_err();
    match err {
        TemplateError::CyclicInclude { path: revisited, .. } => assert_eq!(revisited, path),
        other => panic!("expected a cyclic include error, got {:?}", other),
    }
}

#[test]
fn test_diamond_include_is_not_a_cycle() {
    let template = load_template("diamond/a.tpl");
    assert_eq!(render(&template, &Environment::new()).unwrap(), "B[D]C[D]");
}

#[test]
fn test_diamond_dependencies_list_each_file_once() {
    let options = TemplateOptions::default().with_base_path(fixture_path("diamond"));
    let text = r#"#{include: "b.tpl" }##{include: "c.tpl" }#"#;

    let deps: Vec<PathBuf> = get_dependencies(text, &options)
        .unwrap()
        .into_iter()
        .collect();

    assert_eq!(
        deps,
        vec![
            fixture_path("diamond/b.tpl"),
            fixture_path("diamond/d.tpl"),
            fixture_path("diamond/c.tpl"),
        ]
    );
}

#[test]
fn test_keep_marker_overrides_trim_all() {
    let options = TemplateOptions::default().with_trim(TrimPolicy::All, TrimPolicy::All);
    let template = compile("A\n  #{+ x = 1 }#\nB", "keep", &options).unwrap();

    assert_eq!(render(&template, &Environment::new()).unwrap(), "A\n  B");
}

#[test]
fn test_code_policy_removes_directive_line() {
    let options = TemplateOptions::from_partial(&json!({
        "trim_left": "code",
        "trim_right": "code",
    }))
    .unwrap();
    let template = compile("A\n#{ x=1 }#\nB", "code-line", &options).unwrap();

    assert_eq!(render(&template, &Environment::new()).unwrap(), "A\nB");
}

#[test]
fn test_custom_tags_from_partial_options() {
    let options = TemplateOptions::from_partial(&json!({
        "start_tag": "<%",
        "end_tag": "%>",
    }))
    .unwrap();
    let template = compile("<%= 6 * 7 %> #{= not_a_directive }#", "tags", &options).unwrap();

    assert_eq!(
        render(&template, &Environment::new()).unwrap(),
        "42 #{= not_a_directive }#"
    );
}

#[test]
fn test_environments_do_not_leak_between_runs() {
    let template = compile(
        "#{ if seen == nil then seen = name end }##{= seen }#",
        "leak",
        &TemplateOptions::default(),
    )
    .unwrap();

    let mut first = Environment::new();
    first.insert("name", "first");
    let mut second = Environment::new();
    second.insert("name", "second");

    assert_eq!(render(&template, &first).unwrap(), "first");
    assert_eq!(render(&template, &second).unwrap(), "second");
}

#[test]
fn test_concurrent_renders_of_one_template() {
    let template = compile("#{= n * 2 }#", "double", &TemplateOptions::default()).unwrap();

    let outputs: Vec<String> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|n| {
                let template = &template;
                scope.spawn(move || {
                    let mut env = Environment::new();
                    env.insert("n", n);
                    render(template, &env).unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(outputs, vec!["0", "2", "4", "6"]);
}

#[test]
fn test_run_yields_fragments_until_fault() {
    let template = compile(
        "a#{ emit('b') error('boom') }#c",
        "faulty",
        &TemplateOptions::default(),
    )
    .unwrap();

    let mut fragments = run(&template, &Environment::new()).unwrap();
    assert_eq!(fragments.next().unwrap().unwrap(), "a");
    assert_eq!(fragments.next().unwrap().unwrap(), "b");
    assert!(matches!(
        fragments.next(),
        Some(Err(TemplateError::Runtime { .. }))
    ));
    assert!(fragments.next().is_none());

    // The compiled template survives the fault.
    let mut again = run(&template, &Environment::new()).unwrap();
    assert_eq!(again.next().unwrap().unwrap(), "a");
}

#[test]
fn test_consumer_may_stop_early() {
    let template = compile(
        "#{ for i = 1, 1000000 do emit(i, ',') end }#",
        "many",
        &TemplateOptions::default(),
    )
    .unwrap();

    let first: Vec<String> = run(&template, &Environment::new())
        .unwrap()
        .take(4)
        .collect::<Result<_, _>>()
        .unwrap();

    assert_eq!(first, vec!["1", ",", "2", ","]);
}

#[test]
fn test_host_functions() {
    let template = compile("#{= shout(who) }#", "shout", &TemplateOptions::default()).unwrap();

    let mut env = Environment::new();
    env.insert("who", "quarto");
    env.insert_function("shout", |args| {
        let text = args.first().and_then(|v| v.as_str()).unwrap_or_default();
        Ok(json!(format!("{}!", text.to_uppercase())))
    });

    assert_eq!(render(&template, &env).unwrap(), "QUARTO!");
}

#[test]
fn test_forbidden_capabilities_are_rejected() {
    let options = TemplateOptions::default();

    let direct = compile("#{ io.write('x') }#", "direct", &options).unwrap();
    assert!(matches!(
        render(&direct, &Environment::new()),
        Err(TemplateError::DisallowedCode { .. })
    ));

    let dynamic = compile(r#"#{= _ENV["i" .. "o"] }#"#, "dynamic", &options).unwrap();
    assert!(matches!(
        render(&dynamic, &Environment::new()),
        Err(TemplateError::DisallowedCode { .. })
    ));
}

#[test]
fn test_forbidden_names_may_be_bound_locally() {
    let options = TemplateOptions::default();

    let looped = compile(
        "#{ for _, io in ipairs({1, 2}) do emit(io) end }#",
        "loop",
        &options,
    )
    .unwrap();
    assert_eq!(render(&looped, &Environment::new()).unwrap(), "12");

    let listed = compile(
        "#{ local a, load = 'x', 'y' emit(a, load) }#",
        "locals",
        &options,
    )
    .unwrap();
    assert_eq!(render(&listed, &Environment::new()).unwrap(), "xy");
}

#[test]
fn test_bytecode_is_rejected() {
    let err = compile("#{ x = '\u{1b}Lua' }#", "bytecode", &TemplateOptions::default())
        .unwrap_err();
    assert!(matches!(err, TemplateError::DisallowedCode { .. }));
}

#[test]
fn test_include_relative_to_temp_dir() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("inc")).unwrap();
    fs::write(dir.path().join("main.tpl"), "<#{include: 'inc/one.tpl' }#>").unwrap();
    fs::write(dir.path().join("inc/one.tpl"), "1#{include: 'two.tpl' }#").unwrap();
    fs::write(dir.path().join("inc/two.tpl"), "2").unwrap();

    let path = dir.path().join("main.tpl");
    let template = compile_file(&path, &TemplateOptions::default()).unwrap();
    assert_eq!(render(&template, &Environment::new()).unwrap(), "<12>");
}

#[test]
fn test_missing_include_reports_path() {
    let dir = tempfile::tempdir().unwrap();
    let options = TemplateOptions::default().with_base_path(dir.path());

    let err = compile("#{include: 'absent.tpl' }#", "missing", &options).unwrap_err();
    match err {
        TemplateError::IncludeIo { path, .. } => assert_eq!(path, dir.path().join("absent.tpl")),
        other => panic!("expected an include I/O error, got {:?}", other),
    }
}

#[test]
fn test_include_path_must_be_a_literal() {
    let err = compile(
        "#{include: name .. '.tpl' }#",
        "dynamic-include",
        &TemplateOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, TemplateError::SyntaxLiteral { .. }));
}
