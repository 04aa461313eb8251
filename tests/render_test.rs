use hamly::expr::EvalError;
use hamly::options::OptimizerOptions;
use hamly::tpl::ir::{self, InstrKind};
use hamly::{HamlError, Renderer, compile};
use serde_json::json;

fn build(src: &str, options: &OptimizerOptions) -> Renderer {
    Renderer::new(compile("test", src, options).unwrap())
}

/// Renders with and without the optimizer and checks both agree.
fn render_both(src: &str, ctx: serde_json::Value) -> String {
    let optimized = build(src, &OptimizerOptions::new()).render(&ctx).unwrap();
    let plain = build(src, &OptimizerOptions::disabled()).render(&ctx).unwrap();
    assert_eq!(optimized, plain, "optimizer changed output of:\n{}", src);
    optimized
}

fn has(renderer: &Renderer, pred: fn(&InstrKind) -> bool) -> bool {
    ir::any(renderer.template().body(), &mut |i| pred(&i.kind))
}

#[test]
fn test_literal_template_unchanged_by_optimizer() {
    let src = "\
%html
  %body.main
    %p#intro(lang='en') Plain text & more
    %br
    closing words";
    let out = render_both(src, json!({}));
    assert_eq!(
        out,
        "<html>\n<body class='main'>\n<p id='intro' lang='en'>\nPlain text & more\n</p>\n<br></br>\nclosing words\n</body>\n</html>\n"
    );
}

#[test]
fn test_sorted_shorthand_attributes() {
    assert_eq!(
        render_both("%div.foo#bar", json!({})),
        "<div class='foo' id='bar'></div>\n"
    );
}

#[test]
fn test_static_loop_unrolled() {
    let src = "- for x in [1,2,3]\n  = x";
    let renderer = build(src, &OptimizerOptions::new());
    assert!(!has(&renderer, |k| matches!(k, InstrKind::Loop { .. })));
    assert_eq!(renderer.render(&json!({})).unwrap(), "1\n2\n3\n");
}

#[test]
fn test_output_is_escaped() {
    assert_eq!(render_both("= \"<b>\"", json!({})), "&lt;b&gt;\n");
    assert_eq!(
        render_both("= markup", json!({ "markup": "<i>&</i>" })),
        "&lt;i&gt;&amp;&lt;/i&gt;\n"
    );
}

#[test]
fn test_dynamic_attribute_value_at_render_time() {
    let renderer = build("%a(title=user_title)", &OptimizerOptions::new());
    assert_eq!(renderer.required(), &["user_title".to_string()]);
    assert_eq!(
        renderer.render(&json!({ "user_title": "x&y" })).unwrap(),
        "<a title='x&amp;y'></a>\n"
    );
    assert_eq!(
        renderer.render(&json!({ "user_title": "it's" })).unwrap(),
        "<a title='it&#39;s'></a>\n"
    );
}

#[test]
fn test_dynamic_attribute_names_fall_back() {
    let src = "%a{name: value, 'id': 'x'}";
    let out = render_both(src, json!({ "name": "href", "value": "/a?b=1&c=2" }));
    assert_eq!(out, "<a href='/a?b=1&amp;c=2' id='x'></a>\n");
    let out = render_both(src, json!({ "name": "", "value": "dropped" }));
    assert_eq!(out, "<a id='x'></a>\n");
}

#[test]
fn test_repeated_attribute_names_grouped() {
    let out = render_both("%p.a(('class', extra), ('data-n', 2))", json!({ "extra": "b" }));
    assert_eq!(out, "<p class='b a' data-n='2'></p>\n");
}

#[test]
fn test_indentation_error_line() {
    let err = compile("t", "%p\n  %span\n   oops", &OptimizerOptions::new()).unwrap_err();
    assert!(matches!(err, HamlError::Indentation { line: 3 }));
    assert_eq!(err.to_string(), "bad indent on line 3");
}

#[test]
fn test_nesting_error_line() {
    for (src, line) in [
        ("%p\n= name\n  %b", 2),
        ("plain\n  %b", 1),
        ("%div\n  + x = 1\n    %b", 2),
    ] {
        let err = compile("t", src, &OptimizerOptions::new()).unwrap_err();
        assert!(
            matches!(err, HamlError::Nesting { line: l } if l == line),
            "{:?} for {:?}",
            err,
            src
        );
    }
}

#[test]
fn test_procedure_inlined_and_removed() {
    let src = "\
- def badge(label, kind='info')
  %span{'class': kind}= label
- for user in users
  + badge(user['name'])
  + badge('admin', 'warn')";
    let ctx = json!({ "users": [{ "name": "ann" }, { "name": "<bob>" }] });
    let out = render_both(src, ctx);
    assert_eq!(
        out,
        "<span class='info'>\nann\n</span>\n<span class='warn'>\nadmin\n</span>\n\
<span class='info'>\n&lt;bob&gt;\n</span>\n<span class='warn'>\nadmin\n</span>\n"
    );

    let renderer = build(src, &OptimizerOptions::new());
    assert!(!has(&renderer, |k| matches!(k, InstrKind::ProcedureDef(_))));
    assert!(!has(&renderer, |k| matches!(k, InstrKind::Eval(_))));
    assert_eq!(renderer.required(), &["users".to_string()]);
}

#[test]
fn test_recursive_procedures_terminate() {
    let src = "\
- def f(n)
  = n
  - if n > 0
    + g(n - 1)
- def g(n)
  - if n > 0
    + f(n - 1)
+ f(4)";
    assert_eq!(render_both(src, json!({})), "4\n2\n0\n");
    for rounds in [0, 1, 2, 100] {
        let options = OptimizerOptions::new().max_iterations(rounds);
        assert_eq!(build(src, &options).render(&()).unwrap(), "4\n2\n0\n");
    }
}

#[test]
fn test_conditionals_equivalent() {
    let src = "\
- if debug
  %pre= state
- elif 1 + 1 == 2
  static branch
- else
  never";
    assert_eq!(
        render_both(src, json!({ "debug": true, "state": "<ok>" })),
        "<pre>\n&lt;ok&gt;\n</pre>\n"
    );
    assert_eq!(
        render_both(src, json!({ "debug": false, "state": "" })),
        "static branch\n"
    );

    let folded = build("- if len('ab') == 2\n  yes\n- else\n  no", &OptimizerOptions::new());
    assert!(!has(&folded, |k| matches!(k, InstrKind::Conditional { .. })));
}

#[test]
fn test_statements_and_while() {
    let src = "\
+ total = 0
+ i = 0
- while i < len(prices)
  + total = total + prices[i]
  + i = i + 1
%p= 'total: ' + str(total)
+ a, b = 'xy'
= b + a";
    assert_eq!(
        render_both(src, json!({ "prices": [3, 4.5] })),
        "<p>\ntotal: 7.5\n</p>\nyx\n"
    );
}

#[test]
fn test_free_variables() {
    let src = "\
- for row in rows
  = row
+ count = len(rows)
= count
- def cell(value, *rest, **opts)
  = value
  = heading
+ cell(caption)";
    let renderer = build(src, &OptimizerOptions::disabled());
    assert_eq!(renderer.required(), &["rows", "heading", "caption"]);
}

#[test]
fn test_missing_variable_and_render_errors() {
    let renderer = build("%p= who", &OptimizerOptions::new());
    let err = renderer.render(&json!({})).unwrap_err();
    assert!(matches!(err, HamlError::MissingVariable(ref n) if n == "who"));

    let renderer = build("%p\n  = 10 // d", &OptimizerOptions::new());
    let err = renderer.render(&json!({ "d": 0 })).unwrap_err();
    assert!(matches!(
        err,
        HamlError::Render {
            line: 2,
            source: EvalError::ZeroDivision
        }
    ));
}

#[test]
fn test_static_failure_left_for_render_time() {
    let renderer = build("- if flag\n  = 1 / 0\nok", &OptimizerOptions::new());
    assert_eq!(renderer.render(&json!({ "flag": false })).unwrap(), "ok\n");
    assert!(renderer.render(&json!({ "flag": true })).is_err());
}

#[test]
fn test_unsupported_statement() {
    let err = compile("t", "%p\n+ x += 1", &OptimizerOptions::new()).unwrap_err();
    assert!(matches!(err, HamlError::UnsupportedStatement { line: 2, .. }));
    let err = compile("t", "+ import os", &OptimizerOptions::new()).unwrap_err();
    assert!(err.to_string().starts_with("cannot convert statement"));
}

#[test]
fn test_render_is_repeatable() {
    let renderer = build("- for x in xs\n  %i= x", &OptimizerOptions::new());
    let ctx = json!({ "xs": ["a", "b"] });
    let first = renderer.render(&ctx).unwrap();
    assert_eq!(first, renderer.render(&ctx).unwrap());
}

#[test]
fn test_value_text_forms() {
    let out = render_both(
        "= none\n= flag\n= 2.0\n= [1, 'a']\n= {'k': None}",
        json!({ "none": null, "flag": true }),
    );
    assert_eq!(out, "None\nTrue\n2.0\n[1, 'a']\n{'k': None}\n");
}

#[test]
fn test_callee_sees_caller_parameters() {
    let src = "\
- def show()
  + shown = p
  = shown
- def wrap(p)
  + show()
+ wrap(1)";
    assert_eq!(render_both(src, json!({ "p": 5 })), "1\n");

    let renderer = build(src, &OptimizerOptions::new());
    assert!(has(&renderer, |k| matches!(k, InstrKind::Eval(_))));
}

#[test]
fn test_huge_static_values_not_built() {
    let src = "- if flag\n  = 'abc' * 9000000000000000000\nok";
    assert_eq!(render_both(src, json!({ "flag": false })), "ok\n");
    let renderer = build(src, &OptimizerOptions::new());
    let err = renderer.render(&json!({ "flag": true })).unwrap_err();
    assert!(matches!(
        err,
        HamlError::Render {
            line: 2,
            source: EvalError::Overflow
        }
    ));

    let renderer = build("- for i in range(1000000000)\n  = i", &OptimizerOptions::new());
    assert!(has(&renderer, |k| matches!(k, InstrKind::Loop { .. })));

    let renderer = build("- if flag\n  = 'ab' * 100000", &OptimizerOptions::new());
    assert_eq!(renderer.render(&json!({ "flag": false })).unwrap(), "");
}

#[test]
fn test_merged_writes_report_their_line() {
    let src = "%ul\n  %li= a\n  %li= 10 // b";
    let renderer = build(src, &OptimizerOptions::new());
    assert_eq!(
        renderer.render(&json!({ "a": 1, "b": 2 })).unwrap(),
        "<ul>\n<li>\n1\n</li>\n<li>\n5\n</li>\n</ul>\n"
    );
    let err = renderer.render(&json!({ "a": 1, "b": 0 })).unwrap_err();
    assert_eq!(err.line(), Some(3));
}
