// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg(test)]

use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;

use anyhow::{anyhow, Result};
use indexmap::IndexMap;
use serde_json::json;

use envdef::ast::{self, Accessor};
use envdef::provider::{Provider, ProviderOutput, ProviderRegistry};
use envdef::{
    eval_environment, CancelToken, Environment, ErrorKind, ImportResolver, NoImports, Schema,
    Value, ValueRepr, ValueSource,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// An import resolver backed by JSON documents.
struct JsonImports(HashMap<&'static str, serde_json::Value>);

impl ImportResolver for JsonImports {
    fn resolve(&self, name: &str) -> Result<Rc<Value>> {
        let json = self
            .0
            .get(name)
            .ok_or_else(|| anyhow!("unknown environment {name:?}"))?;
        Value::from_json(json, &ValueSource::Import(name.into()), false)
    }
}

fn eval(env: &ast::Environment) -> (Option<Environment>, envdef::Diagnostics) {
    eval_environment(
        "test",
        env,
        &NoImports,
        &ProviderRegistry::new(),
        CancelToken::new(),
    )
}

fn eval_ok(env: &ast::Environment) -> Result<Environment> {
    let (result, diags) = eval(env);
    if diags.has_errors() {
        let messages: Vec<String> = diags.iter().map(|d| d.summary.clone()).collect();
        return Err(anyhow!("unexpected diagnostics: {messages:?}"));
    }
    result.ok_or_else(|| anyhow!("evaluation aborted"))
}

fn prop<'a>(v: &'a Rc<Value>, key: &str) -> Result<&'a Rc<Value>> {
    v.property(key)
        .ok_or_else(|| anyhow!("missing property {key:?}"))
}

fn top<'a>(env: &'a Environment, key: &str) -> Result<&'a Rc<Value>> {
    env.properties
        .get(key)
        .ok_or_else(|| anyhow!("missing property {key:?}"))
}

#[test]
fn interpolation() -> Result<()> {
    init_logging();
    let env = ast::Environment::new(ast::object([
        (
            "greeting",
            ast::interpolate([ast::part_text_ref("hello ", [Accessor::key("name")])]),
        ),
        ("name", ast::string("world")),
    ]));

    let result = eval_ok(&env)?;
    let greeting = top(&result, "greeting")?;
    assert_eq!(greeting.to_canonical_string(), "hello world");
    assert_eq!(greeting.type_name(), "string");
    Ok(())
}

#[test]
fn single_reference_preserves_type() -> Result<()> {
    let env = ast::Environment::new(ast::object([
        ("n", ast::number("1.50")),
        ("alias", ast::interpolate([ast::part_ref([Accessor::key("n")])])),
        ("text", ast::to_string(ast::symbol([Accessor::key("n")]))),
    ]));

    let result = eval_ok(&env)?;
    assert_eq!(top(&result, "alias")?.type_name(), "number");
    assert_eq!(top(&result, "alias")?.to_canonical_string(), "1.50");
    assert_eq!(top(&result, "text")?.to_canonical_string(), "1.50");
    Ok(())
}

#[test]
fn imports_and_override() -> Result<()> {
    let imports = JsonImports(HashMap::from([(
        "green-channel",
        json!({
            "config": {
                "aws": {
                    "region": "us-east-1",
                    "accountId": "012345",
                }
            }
        }),
    )]));

    let env = ast::Environment::new(ast::object([(
        "config",
        ast::object_expr([(
            "aws",
            ast::object_expr([("region", ast::string("us-west-2"))]),
        )]),
    )]))
    .with_imports(["green-channel"]);

    let (result, diags) = eval_environment(
        "test",
        &env,
        &imports,
        &ProviderRegistry::new(),
        CancelToken::new(),
    );
    assert!(!diags.has_errors());
    let result = result.ok_or_else(|| anyhow!("evaluation aborted"))?;

    let aws = prop(top(&result, "config")?, "aws")?;
    assert_eq!(prop(aws, "region")?.to_canonical_string(), "us-west-2");
    assert_eq!(prop(aws, "accountId")?.to_canonical_string(), "012345");
    Ok(())
}

#[test]
fn import_only_bindings_resolve() -> Result<()> {
    let imports = JsonImports(HashMap::from([(
        "base",
        json!({"region": "us-east-1"}),
    )]));

    let env = ast::Environment::new(ast::object([(
        "endpoint",
        ast::interpolate([ast::part_text_ref("sqs.", [Accessor::key("region")])]),
    )]))
    .with_imports(["base"]);

    let (result, diags) = eval_environment(
        "test",
        &env,
        &imports,
        &ProviderRegistry::new(),
        CancelToken::new(),
    );
    assert!(!diags.has_errors());
    let result = result.ok_or_else(|| anyhow!("evaluation aborted"))?;
    assert_eq!(
        top(&result, "endpoint")?.to_canonical_string(),
        "sqs.us-east-1"
    );
    // Properties defined only by imports flow through to the result.
    assert_eq!(top(&result, "region")?.to_canonical_string(), "us-east-1");
    Ok(())
}

/// Merging `{A,B,C}` in any left-to-right chunking yields the same result.
#[test]
fn base_merge_is_associative() -> Result<()> {
    let a = json!({"x": {"p": 1, "q": 2}, "y": "a"});
    let b = json!({"x": {"q": 3, "r": 4}, "z": "b"});
    let c = json!({"x": {"r": 5}, "y": "c"});

    let merged_ab = {
        let imports = JsonImports(HashMap::from([("a", a.clone()), ("b", b.clone())]));
        let env = ast::Environment::new(ast::object([])).with_imports(["a", "b"]);
        let (result, _) = eval_environment(
            "ab",
            &env,
            &imports,
            &ProviderRegistry::new(),
            CancelToken::new(),
        );
        serde_json::to_value(&result.ok_or_else(|| anyhow!("aborted"))?.properties)?
    };

    let all_at_once = {
        let imports = JsonImports(HashMap::from([
            ("a", a.clone()),
            ("b", b.clone()),
            ("c", c.clone()),
        ]));
        let env = ast::Environment::new(ast::object([])).with_imports(["a", "b", "c"]);
        let (result, _) = eval_environment(
            "abc",
            &env,
            &imports,
            &ProviderRegistry::new(),
            CancelToken::new(),
        );
        serde_json::to_value(&result.ok_or_else(|| anyhow!("aborted"))?.properties)?
    };

    let chunked = {
        let imports = JsonImports(HashMap::from([("ab", merged_ab), ("c", c)]));
        let env = ast::Environment::new(ast::object([])).with_imports(["ab", "c"]);
        let (result, _) = eval_environment(
            "abc2",
            &env,
            &imports,
            &ProviderRegistry::new(),
            CancelToken::new(),
        );
        serde_json::to_value(&result.ok_or_else(|| anyhow!("aborted"))?.properties)?
    };

    assert_eq!(all_at_once, chunked);
    Ok(())
}

#[test]
fn cycle_terminates_with_diagnostics() -> Result<()> {
    let env = ast::Environment::new(ast::object([
        ("a", ast::interpolate([ast::part_ref([Accessor::key("b")])])),
        ("b", ast::interpolate([ast::part_ref([Accessor::key("a")])])),
    ]));

    let (result, diags) = eval(&env);
    let result = result.ok_or_else(|| anyhow!("evaluation aborted"))?;

    let cyclic: Vec<_> = diags
        .iter()
        .filter(|d| d.kind == ErrorKind::Reference)
        .collect();
    assert_eq!(cyclic.len(), 2);
    for d in &cyclic {
        assert!(d.summary.contains("a"), "{}", d.summary);
        assert!(d.summary.contains("b"), "{}", d.summary);
    }

    assert!(top(&result, "a")?.unknown);
    assert!(top(&result, "b")?.unknown);
    Ok(())
}

#[test]
fn self_cycle_reports_once() -> Result<()> {
    let env = ast::Environment::new(ast::object([(
        "a",
        ast::interpolate([ast::part_ref([Accessor::key("a")])]),
    )]));

    let (result, diags) = eval(&env);
    assert_eq!(diags.len(), 1);
    assert!(result.is_some());
    Ok(())
}

/// An object value whose properties carry their own secret flags, for
/// imports that cannot be expressed as plain JSON.
fn object_value(
    def: &ValueSource,
    properties: impl IntoIterator<Item = (&'static str, Rc<Value>)>,
) -> Rc<Value> {
    let properties: IndexMap<Rc<str>, Rc<Value>> = properties
        .into_iter()
        .map(|(k, v)| (Rc::from(k), v))
        .collect();
    let schema = Rc::new(Schema::record(
        properties
            .iter()
            .map(|(k, v)| (k.clone(), v.schema.clone()))
            .collect(),
    ));
    let secret = properties.values().any(|v| v.secret);
    Rc::new(Value {
        repr: ValueRepr::Object(properties),
        def: def.clone(),
        schema,
        secret,
        unknown: false,
    })
}

/// Overriding a secret base value with a fresh literal clears secrecy:
/// secrecy comes from an expression's own variant and evaluated inputs,
/// never from the value it overrides.
#[test]
fn overriding_a_secret_base_clears_secrecy() -> Result<()> {
    struct SecretBase;

    impl ImportResolver for SecretBase {
        fn resolve(&self, name: &str) -> Result<Rc<Value>> {
            let def = ValueSource::Import(name.into());
            let password = Value::from_json(&json!("old"), &def, true)?;
            Ok(object_value(&def, [("password", password)]))
        }
    }

    let env = ast::Environment::new(ast::object([("password", ast::string("new"))]))
        .with_imports(["vault"]);

    let (result, diags) = eval_environment(
        "test",
        &env,
        &SecretBase,
        &ProviderRegistry::new(),
        CancelToken::new(),
    );
    assert!(!diags.has_errors());
    let result = result.ok_or_else(|| anyhow!("evaluation aborted"))?;

    let password = top(&result, "password")?;
    assert_eq!(password.to_canonical_string(), "new");
    assert!(!password.secret);
    assert!(!result.properties.values().any(|v| v.secret));
    Ok(())
}

/// A later import overriding a secret key away leaves the merged container
/// non-secret: the merged object's flag reflects its actual children.
#[test]
fn import_stacking_clears_overridden_secrets() -> Result<()> {
    struct Layers;

    impl ImportResolver for Layers {
        fn resolve(&self, name: &str) -> Result<Rc<Value>> {
            let def = ValueSource::Import(name.into());
            match name {
                "vault" => {
                    let password = Value::from_json(&json!("old"), &def, true)?;
                    let config = object_value(&def, [("password", password)]);
                    Ok(object_value(&def, [("config", config)]))
                }
                "plain" => Value::from_json(&json!({"config": {"password": "new"}}), &def, false),
                _ => Err(anyhow!("unknown environment {name:?}")),
            }
        }
    }

    let env = ast::Environment::new(ast::object([(
        "copy",
        ast::interpolate([ast::part_ref([Accessor::key("config")])]),
    )]))
    .with_imports(["vault", "plain"]);

    let (result, diags) = eval_environment(
        "test",
        &env,
        &Layers,
        &ProviderRegistry::new(),
        CancelToken::new(),
    );
    assert!(!diags.has_errors());
    let result = result.ok_or_else(|| anyhow!("evaluation aborted"))?;

    let copy = top(&result, "copy")?;
    assert!(!copy.secret);
    let password = prop(copy, "password")?;
    assert_eq!(password.to_canonical_string(), "new");
    assert!(!password.secret);
    Ok(())
}

#[test]
fn secret_propagates_through_interpolation() -> Result<()> {
    let env = ast::Environment::new(ast::object([
        ("password", ast::secret(ast::string("hunter2"))),
        (
            "line",
            ast::interpolate([ast::part_text_ref("pw=", [Accessor::key("password")])]),
        ),
    ]));

    let result = eval_ok(&env)?;
    let line = top(&result, "line")?;
    assert!(line.secret);
    assert_eq!(line.to_canonical_string(), "pw=hunter2");
    assert!(top(&result, "password")?.secret);
    Ok(())
}

#[test]
fn secret_propagates_through_builtins() -> Result<()> {
    let env = ast::Environment::new(ast::object([
        ("password", ast::secret(ast::string("hunter2"))),
        (
            "encoded",
            ast::to_base64(ast::symbol([Accessor::key("password")])),
        ),
        ("json", ast::to_json(ast::symbol([Accessor::key("password")]))),
    ]));

    let result = eval_ok(&env)?;
    assert!(top(&result, "encoded")?.secret);
    assert_eq!(top(&result, "encoded")?.to_canonical_string(), "aHVudGVyMg==");
    assert!(top(&result, "json")?.secret);
    assert_eq!(top(&result, "json")?.to_canonical_string(), "\"hunter2\"");
    Ok(())
}

#[test]
fn to_json_is_canonical() -> Result<()> {
    let env = ast::Environment::new(ast::object([(
        "text",
        ast::to_json(ast::object_expr([
            ("b", ast::number("1")),
            ("a", ast::number("2")),
        ])),
    )]));

    let result = eval_ok(&env)?;
    assert_eq!(
        top(&result, "text")?.to_canonical_string(),
        r#"{"a":2,"b":1}"#
    );
    Ok(())
}

#[test]
fn to_json_round_trips() -> Result<()> {
    let env = ast::Environment::new(ast::object([
        (
            "v",
            ast::object_expr([
                ("list", ast::list([ast::number("1"), ast::string("two")])),
                ("flag", ast::boolean(true)),
                ("nothing", ast::null()),
            ]),
        ),
        ("text", ast::to_json(ast::symbol([Accessor::key("v")]))),
    ]));

    let result = eval_ok(&env)?;
    let parsed: serde_json::Value = serde_json::from_str(&top(&result, "text")?.to_canonical_string())?;
    assert_eq!(parsed, json!({"flag": true, "list": [1, "two"], "nothing": null}));
    Ok(())
}

#[test]
fn join_interleaves() -> Result<()> {
    let env = ast::Environment::new(ast::object([(
        "joined",
        ast::join(
            ast::string("-"),
            ast::list([ast::string("a"), ast::string("b"), ast::string("c")]),
        ),
    )]));

    let result = eval_ok(&env)?;
    assert_eq!(top(&result, "joined")?.to_canonical_string(), "a-b-c");
    Ok(())
}

#[test]
fn join_rejects_non_string_elements() -> Result<()> {
    let env = ast::Environment::new(ast::object([(
        "joined",
        ast::join(
            ast::string("-"),
            ast::list([ast::string("a"), ast::number("1")]),
        ),
    )]));

    let (result, diags) = eval(&env);
    let result = result.ok_or_else(|| anyhow!("evaluation aborted"))?;
    assert!(diags.iter().any(|d| d.kind == ErrorKind::Type));
    assert!(top(&result, "joined")?.unknown);
    Ok(())
}

#[test]
fn access_supports_negative_indices() -> Result<()> {
    let env = ast::Environment::new(ast::object([
        (
            "arr",
            ast::list([ast::number("1"), ast::number("2"), ast::number("3")]),
        ),
        (
            "last",
            ast::symbol([Accessor::key("arr"), Accessor::index(-1)]),
        ),
    ]));

    let result = eval_ok(&env)?;
    assert_eq!(top(&result, "last")?.to_canonical_string(), "3");
    Ok(())
}

#[test]
fn out_of_range_access_is_recoverable() -> Result<()> {
    let env = ast::Environment::new(ast::object([
        ("arr", ast::list([ast::number("1")])),
        (
            "missing",
            ast::symbol([Accessor::key("arr"), Accessor::index(5)]),
        ),
        ("ok", ast::string("still here")),
    ]));

    let (result, diags) = eval(&env);
    let result = result.ok_or_else(|| anyhow!("evaluation aborted"))?;
    assert!(diags.iter().any(|d| d.kind == ErrorKind::Reference));
    assert!(top(&result, "missing")?.unknown);
    assert_eq!(top(&result, "ok")?.to_canonical_string(), "still here");
    Ok(())
}

#[test]
fn string_accessor_on_array_is_a_type_error() -> Result<()> {
    let env = ast::Environment::new(ast::object([
        ("arr", ast::list([ast::number("1")])),
        (
            "bad",
            ast::symbol([Accessor::key("arr"), Accessor::key("first")]),
        ),
    ]));

    let (_, diags) = eval(&env);
    assert!(diags.iter().any(|d| d.kind == ErrorKind::Type));
    Ok(())
}

#[test]
fn unresolved_symbol_is_recoverable() -> Result<()> {
    let env = ast::Environment::new(ast::object([(
        "value",
        ast::symbol([Accessor::key("nonesuch")]),
    )]));

    let (result, diags) = eval(&env);
    let result = result.ok_or_else(|| anyhow!("evaluation aborted"))?;
    assert!(diags.iter().any(|d| d.kind == ErrorKind::Reference));
    assert!(top(&result, "value")?.unknown);
    Ok(())
}

struct OidcProvider;

impl Provider for OidcProvider {
    fn schema(&self) -> (Rc<Schema>, Rc<Schema>) {
        let input = Schema::record(
            [
                (Rc::from("roleArn"), Rc::new(Schema::string())),
                (Rc::from("sessionName"), Rc::new(Schema::string())),
            ]
            .into_iter()
            .collect(),
        );
        let output = Schema::record(
            [(Rc::from("token"), Rc::new(Schema::string()))]
                .into_iter()
                .collect(),
        );
        (Rc::new(input), Rc::new(output))
    }

    fn open(&self, inputs: &Value, _cancel: &CancelToken) -> Result<ProviderOutput> {
        let role = inputs
            .property("roleArn")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("missing roleArn"))?;
        Ok(ProviderOutput::Value {
            value: json!({"token": format!("token-for-{role}")}),
            secret: true,
        })
    }
}

fn oidc_registry() -> ProviderRegistry {
    let mut providers = ProviderRegistry::new();
    providers.register("aws-oidc", Rc::new(OidcProvider));
    providers
}

fn open_env(inputs: ast::Expr) -> ast::Environment {
    ast::Environment::new(ast::object([(
        "creds",
        ast::open(ast::string("aws-oidc"), inputs),
    )]))
}

#[test]
fn open_produces_provider_output() -> Result<()> {
    let env = open_env(ast::object_expr([
        ("roleArn", ast::string("some-role-arn")),
        ("sessionName", ast::string("site-prod-session")),
    ]));

    let (result, diags) = eval_environment(
        "test",
        &env,
        &NoImports,
        &oidc_registry(),
        CancelToken::new(),
    );
    assert!(!diags.has_errors());
    let result = result.ok_or_else(|| anyhow!("evaluation aborted"))?;

    let creds = top(&result, "creds")?;
    assert!(creds.secret, "provider secret hint must stick");
    assert_eq!(
        prop(creds, "token")?.to_canonical_string(),
        "token-for-some-role-arn"
    );
    Ok(())
}

#[test]
fn open_validates_inputs() -> Result<()> {
    let env = open_env(ast::object_expr([(
        "sessionName",
        ast::string("site-prod-session"),
    )]));

    let (result, diags) = eval_environment(
        "test",
        &env,
        &NoImports,
        &oidc_registry(),
        CancelToken::new(),
    );
    let result = result.ok_or_else(|| anyhow!("evaluation aborted"))?;

    let constraint: Vec<_> = diags
        .iter()
        .filter(|d| d.kind == ErrorKind::Constraint)
        .collect();
    assert_eq!(constraint.len(), 1);
    assert!(
        constraint[0].summary.contains("roleArn"),
        "{}",
        constraint[0].summary
    );

    // The result is unknown, but typed by the provider's output schema.
    let creds = top(&result, "creds")?;
    assert!(creds.unknown);
    assert_eq!(creds.schema.ty.as_deref(), Some("object"));
    Ok(())
}

#[test]
fn unknown_provider_is_recoverable() -> Result<()> {
    let env = open_env(ast::object_expr([]));

    let (result, diags) = eval(&env);
    let result = result.ok_or_else(|| anyhow!("evaluation aborted"))?;
    assert!(diags.iter().any(|d| d.kind == ErrorKind::Provider));
    assert!(top(&result, "creds")?.unknown);
    Ok(())
}

struct FailingProvider;

impl Provider for FailingProvider {
    fn schema(&self) -> (Rc<Schema>, Rc<Schema>) {
        (Rc::new(Schema::always()), Rc::new(Schema::string()))
    }

    fn open(&self, _inputs: &Value, _cancel: &CancelToken) -> Result<ProviderOutput> {
        Err(anyhow!("connection refused"))
    }
}

#[test]
fn provider_errors_are_recoverable() -> Result<()> {
    let mut providers = ProviderRegistry::new();
    providers.register("flaky", Rc::new(FailingProvider));

    let env = ast::Environment::new(ast::object([
        ("value", ast::open(ast::string("flaky"), ast::object_expr([]))),
        ("ok", ast::string("still here")),
    ]));

    let (result, diags) = eval_environment("test", &env, &NoImports, &providers, CancelToken::new());
    let result = result.ok_or_else(|| anyhow!("evaluation aborted"))?;

    let provider_errors: Vec<_> = diags
        .iter()
        .filter(|d| d.kind == ErrorKind::Provider)
        .collect();
    assert_eq!(provider_errors.len(), 1);
    assert!(provider_errors[0].summary.contains("connection refused"));

    assert!(top(&result, "value")?.unknown);
    assert_eq!(top(&result, "value")?.schema.ty.as_deref(), Some("string"));
    assert_eq!(top(&result, "ok")?.to_canonical_string(), "still here");
    Ok(())
}

struct DeferredProvider;

impl Provider for DeferredProvider {
    fn schema(&self) -> (Rc<Schema>, Rc<Schema>) {
        (Rc::new(Schema::always()), Rc::new(Schema::string()))
    }

    fn open(&self, _inputs: &Value, _cancel: &CancelToken) -> Result<ProviderOutput> {
        Ok(ProviderOutput::Unknown)
    }
}

#[test]
fn deferred_provider_output_stays_typed() -> Result<()> {
    let mut providers = ProviderRegistry::new();
    providers.register("deferred", Rc::new(DeferredProvider));

    let env = ast::Environment::new(ast::object([
        (
            "token",
            ast::open(ast::string("deferred"), ast::object_expr([])),
        ),
        (
            "line",
            ast::interpolate([ast::part_text_ref("token=", [Accessor::key("token")])]),
        ),
    ]));

    let (result, diags) = eval_environment("test", &env, &NoImports, &providers, CancelToken::new());
    assert!(!diags.has_errors());
    let result = result.ok_or_else(|| anyhow!("evaluation aborted"))?;

    assert!(top(&result, "token")?.unknown);
    assert_eq!(top(&result, "token")?.schema.ty.as_deref(), Some("string"));
    // Unknown inputs make the interpolation unknown, but still string-typed.
    assert!(top(&result, "line")?.unknown);
    Ok(())
}

struct CountingProvider {
    calls: Rc<Cell<usize>>,
}

impl Provider for CountingProvider {
    fn schema(&self) -> (Rc<Schema>, Rc<Schema>) {
        (Rc::new(Schema::always()), Rc::new(Schema::string()))
    }

    fn open(&self, _inputs: &Value, _cancel: &CancelToken) -> Result<ProviderOutput> {
        self.calls.set(self.calls.get() + 1);
        Ok(ProviderOutput::Value {
            value: json!("opened"),
            secret: false,
        })
    }
}

/// Each expression is evaluated at most once, observable via a counting
/// provider referenced from several places.
#[test]
fn evaluation_is_memoized() -> Result<()> {
    let calls = Rc::new(Cell::new(0));
    let mut providers = ProviderRegistry::new();
    providers.register(
        "counter",
        Rc::new(CountingProvider {
            calls: calls.clone(),
        }),
    );

    let env = ast::Environment::new(ast::object([
        (
            "token",
            ast::open(ast::string("counter"), ast::object_expr([])),
        ),
        (
            "a",
            ast::interpolate([ast::part_ref([Accessor::key("token")])]),
        ),
        (
            "b",
            ast::interpolate([ast::part_ref([Accessor::key("token")])]),
        ),
    ]));

    let (result, diags) = eval_environment("test", &env, &NoImports, &providers, CancelToken::new());
    assert!(!diags.has_errors());
    let result = result.ok_or_else(|| anyhow!("evaluation aborted"))?;

    assert_eq!(calls.get(), 1);
    assert_eq!(top(&result, "a")?.to_canonical_string(), "opened");
    assert_eq!(top(&result, "b")?.to_canonical_string(), "opened");
    Ok(())
}

#[test]
fn evaluation_is_deterministic() -> Result<()> {
    let imports = JsonImports(HashMap::from([(
        "base",
        json!({"config": {"region": "us-east-1", "zone": "a"}}),
    )]));

    let env = ast::Environment::new(ast::object([
        (
            "config",
            ast::object_expr([("region", ast::string("us-west-2"))]),
        ),
        (
            "summary",
            ast::to_json(ast::symbol([Accessor::key("config")])),
        ),
        (
            "joined",
            ast::join(
                ast::string(","),
                ast::list([ast::string("x"), ast::string("y")]),
            ),
        ),
    ]))
    .with_imports(["base"]);

    let run = || -> Result<String> {
        let (result, diags) = eval_environment(
            "test",
            &env,
            &imports,
            &ProviderRegistry::new(),
            CancelToken::new(),
        );
        assert!(!diags.has_errors());
        let result = result.ok_or_else(|| anyhow!("evaluation aborted"))?;
        Ok(serde_json::to_string(&result)?)
    };

    assert_eq!(run()?, run()?);
    Ok(())
}

#[test]
fn cancellation_aborts_evaluation() -> Result<()> {
    let cancel = CancelToken::new();
    cancel.cancel();

    let env = ast::Environment::new(ast::object([("a", ast::string("x"))]));
    let (result, diags) = eval_environment("test", &env, &NoImports, &ProviderRegistry::new(), cancel);

    assert!(result.is_none());
    assert!(diags
        .iter()
        .any(|d| d.kind == ErrorKind::Internal && d.summary.contains("cancelled")));
    Ok(())
}

#[test]
fn export_has_ranges_schemas_and_variants() -> Result<()> {
    let env = ast::Environment::new(ast::object([
        ("name", ast::string("world")),
        (
            "greeting",
            ast::interpolate([ast::part_text_ref("hello ", [Accessor::key("name")])]),
        ),
        (
            "joined",
            ast::join(ast::string("-"), ast::list([ast::string("a")])),
        ),
    ]));

    let result = eval_ok(&env)?;
    let exported = serde_json::to_value(&result)?;

    let name = &exported["exprs"]["name"];
    assert_eq!(name["literal"], json!("world"));
    assert_eq!(name["schema"]["const"], json!("world"));

    let greeting = &exported["exprs"]["greeting"];
    let parts = greeting["interpolate"]
        .as_array()
        .ok_or_else(|| anyhow!("missing interpolate payload"))?;
    assert_eq!(parts[0]["text"], json!("hello "));
    assert_eq!(parts[0]["value"][0]["key"], json!("name"));

    let joined = &exported["exprs"]["joined"];
    let builtin = &joined["builtin"];
    assert_eq!(builtin["name"], json!("fn::join"));
    assert_eq!(builtin["argSchema"]["type"], json!("array"));
    assert!(builtin["arg"]["list"].is_array());
    Ok(())
}

#[test]
fn export_includes_bases() -> Result<()> {
    let imports = JsonImports(HashMap::from([(
        "base",
        json!({"region": "us-east-1"}),
    )]));

    let env = ast::Environment::new(ast::object([("region", ast::string("us-west-2"))]))
        .with_imports(["base"]);

    let (result, diags) = eval_environment(
        "test",
        &env,
        &imports,
        &ProviderRegistry::new(),
        CancelToken::new(),
    );
    assert!(!diags.has_errors());
    let result = result.ok_or_else(|| anyhow!("evaluation aborted"))?;
    let exported = serde_json::to_value(&result)?;

    let region = &exported["exprs"]["region"];
    assert_eq!(region["literal"], json!("us-west-2"));
    assert_eq!(region["base"]["literal"], json!("us-east-1"));
    assert_eq!(region["base"]["range"]["environment"], json!("base"));
    Ok(())
}

#[test]
fn object_order_is_preserved() -> Result<()> {
    let env = ast::Environment::new(ast::object([
        ("zebra", ast::string("z")),
        ("apple", ast::string("a")),
        ("mango", ast::string("m")),
    ]));

    let result = eval_ok(&env)?;
    let keys: Vec<&str> = result.properties.keys().map(|k| k.as_ref()).collect();
    assert_eq!(keys, ["zebra", "apple", "mango"]);
    Ok(())
}
