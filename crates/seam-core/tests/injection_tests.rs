/*!
# Injection Integration Tests

End-to-end behaviour of instrumented classes: parse, rewrite through the
pipeline, load into a runtime and drive the override table the way a test
harness would.
*/

use pretty_assertions::assert_eq;
use seam_core::matcher::{any, any_list_of, any_map_of, eq};
use seam_core::{
    parse_unit, BuildSession, CompilationUnit, EvaluatorError, ManifestOrigin, Pipeline, Runtime,
    SeamConfig, SiteId, TypeRef, UnitOutput, Value,
};

fn build(source: &str) -> (CompilationUnit, UnitOutput) {
    let unit = parse_unit(source).unwrap();
    let config = SeamConfig::default();
    let output = Pipeline::new(config.clone()).process_unit(&mut BuildSession::new(config), &unit);
    (unit, output)
}

/// Runtime over the unmodified classes, with load-time instrumentation off
fn plain_runtime(unit: &CompilationUnit) -> Runtime {
    let rt = Runtime::with_config(SeamConfig {
        load_time_instrumentation: false,
        ..SeamConfig::default()
    });
    rt.load_unit(unit).unwrap();
    rt
}

fn instrumented_runtime(source: &str) -> Runtime {
    let (_, output) = build(source);
    let rt = Runtime::new();
    rt.load_unit(&output.unit).unwrap();
    for manifest in output.manifests() {
        rt.add_manifest(manifest.clone());
    }
    rt
}

fn site_ids(source: &str) -> Vec<SiteId> {
    let (_, output) = build(source);
    output
        .manifests()
        .flat_map(|m| m.sites.iter().map(|s| s.id.clone()))
        .collect()
}

fn field(object: &Value, name: &str) -> Value {
    object.as_instance().unwrap().get_field(name).unwrap()
}

const ACCOUNT: &str = r#"
@Instrument
class Account {
    static int fee = 2;
    int balance;
    List<String> log = new ArrayList<>();

    Account(int balance) {
        this.balance = balance;
    }

    private int charge(int amount) {
        return amount + fee;
    }

    private void record(String entry) {
        log.add(entry);
    }

    int withdraw(int amount) {
        int total = charge(amount);
        if (total > balance) {
            throw new IllegalStateException("insufficient: " + total);
        }
        balance = balance - total;
        record("withdrew " + amount);
        return balance;
    }

    static Account open(int initial) {
        return new Account(initial);
    }

    String history() {
        return log.toString();
    }
}
"#;

fn account_scenario(rt: &Runtime) -> Vec<String> {
    let account = rt.call_static("Account", "open", vec![20.into()]).unwrap();
    let mut observed = Vec::new();
    for amount in [5, 30, 3] {
        match rt.call_method(&account, "withdraw", vec![amount.into()]) {
            Ok(value) => observed.push(value.to_string()),
            Err(EvaluatorError::Thrown { class, message, .. }) => {
                observed.push(format!("{class}: {message}"))
            }
            Err(e) => panic!("unexpected evaluation error: {e}"),
        }
    }
    observed.push(field(&account, "balance").to_string());
    observed.push(rt.call_method(&account, "history", vec![]).unwrap().to_string());
    observed
}

#[test]
fn test_identifiers_are_stable() {
    let first = site_ids(ACCOUNT);
    assert!(!first.is_empty());
    assert_eq!(first, site_ids(ACCOUNT));

    // Layout changes do not move identifiers
    let reformatted = ACCOUNT.replace("    ", "\t").replace("{\n", "{\n\n");
    assert_eq!(first, site_ids(&reformatted));
}

#[test]
fn test_expected_sites_are_reported() {
    let ids: Vec<String> = site_ids(ACCOUNT).iter().map(|id| id.to_string()).collect();
    assert_eq!(
        ids,
        vec![
            "Account#charge(int)/get:Account.fee#0",
            "Account#withdraw(int)/call:Account.charge(int)#0",
            "Account#withdraw(int)/call:Account.record(String)#0",
            "Account#open(int)/new:Account.<init>(int)#0",
        ]
    );
}

#[test]
fn test_empty_table_is_transparent() {
    let (unit, output) = build(ACCOUNT);
    assert!(output.unit.class("Account").unwrap().contains_guards());

    let expected = vec![
        "13".to_string(),
        "IllegalStateException: insufficient: 32".to_string(),
        "8".to_string(),
        "8".to_string(),
        "[withdrew 5, withdrew 3]".to_string(),
    ];
    assert_eq!(account_scenario(&plain_runtime(&unit)), expected);
    assert_eq!(account_scenario(&instrumented_runtime(ACCOUNT)), expected);
}

const TICKER: &str = r#"
@Instrument
class Ticker {
    int ticks = 0;
    int tick() { ticks = ticks + 1; return ticks; }
    int twice(int n) { return n * 2; }
    int run() { return twice(tick()); }
}
"#;

#[test]
fn test_arguments_are_evaluated_once() {
    let rt = instrumented_runtime(TICKER);
    let ticker = rt.instantiate("Ticker", vec![]).unwrap();

    assert_eq!(rt.call_method(&ticker, "run", vec![]).unwrap(), Value::Integer(2));
    assert_eq!(field(&ticker, "ticks"), Value::Integer(1));

    rt.overrides().when("Ticker#run()/call:Ticker.twice(int)#0").returns(100);
    assert_eq!(rt.call_method(&ticker, "run", vec![]).unwrap(), Value::Integer(100));
    assert_eq!(field(&ticker, "ticks"), Value::Integer(2));

    rt.overrides().clear();
    rt.overrides().when("Ticker#run()/call:Ticker.tick()#0").returns(50);
    assert_eq!(rt.call_method(&ticker, "run", vec![]).unwrap(), Value::Integer(100));
    assert_eq!(field(&ticker, "ticks"), Value::Integer(2));
}

const GATE: &str = r#"
@Instrument
class Gate {
    int calls = 0;
    private boolean check(int x) { calls = calls + 1; return x > 0; }
    private int bump() { calls = calls + 100; return 1; }
    private int combine(int a, int b) { return a + b; }
    boolean both(boolean flag, int x) { return flag && check(x); }
    boolean either(boolean flag, int x) { return flag || check(x); }
    int order(int d) { return combine(bump(), 10 / d); }
}
"#;

#[test]
fn test_short_circuit_skips_the_guarded_call() {
    let rt = instrumented_runtime(GATE);
    let gate = rt.instantiate("Gate", vec![]).unwrap();
    let both = "Gate#both(boolean,int)/call:Gate.check(int)#0";
    let either = "Gate#either(boolean,int)/call:Gate.check(int)#0";
    rt.overrides().set_recording(true);
    rt.overrides().when(both).returns(true);
    rt.overrides().when(either).returns(false);

    let call = |method: &str, flag: bool, x: i64| {
        rt.call_method(&gate, method, vec![flag.into(), x.into()])
            .unwrap()
    };
    assert_eq!(call("both", false, 1), Value::Boolean(false));
    assert_eq!(call("either", true, -1), Value::Boolean(true));
    assert_eq!(field(&gate, "calls"), Value::Integer(0));
    assert_eq!(rt.overrides().invocation_count(&SiteId::from(both)), 0);
    assert_eq!(rt.overrides().invocation_count(&SiteId::from(either)), 0);

    // The right side runs only through the override
    assert_eq!(call("both", true, -1), Value::Boolean(true));
    assert_eq!(call("either", false, 1), Value::Boolean(false));
    assert_eq!(field(&gate, "calls"), Value::Integer(0));
}

#[test]
fn test_argument_before_a_throwing_argument_runs_once() {
    let rt = instrumented_runtime(GATE);
    let gate = rt.instantiate("Gate", vec![]).unwrap();
    let combine = SiteId::from("Gate#order(int)/call:Gate.combine(int,int)#0");
    rt.overrides().set_recording(true);
    rt.overrides().when(combine.clone()).returns(7);

    match rt.call_method(&gate, "order", vec![0.into()]) {
        Err(EvaluatorError::Thrown { class, message, .. }) => {
            assert_eq!(class, "ArithmeticException");
            assert_eq!(message, "/ by zero");
        }
        other => panic!("expected an ArithmeticException, got {other:?}"),
    }
    assert_eq!(field(&gate, "calls"), Value::Integer(100));
    assert_eq!(rt.overrides().invocation_count(&combine), 0);

    assert_eq!(
        rt.call_method(&gate, "order", vec![2.into()]).unwrap(),
        Value::Integer(7)
    );
    assert_eq!(field(&gate, "calls"), Value::Integer(200));
    assert_eq!(
        rt.overrides().invocations(&combine)[0].args,
        vec![Value::Integer(1), Value::Integer(5)]
    );
}

const PRICING: &str = r#"
@Instrument
class Pricing {
    private int rate(int tier) { return tier; }
    int quote(int tier) { return rate(tier); }
}
"#;

const RATE_SITE: &str = "Pricing#quote(int)/call:Pricing.rate(int)#0";

#[test]
fn test_first_registered_override_wins() {
    let rt = instrumented_runtime(PRICING);
    let pricing = rt.instantiate("Pricing", vec![]).unwrap();
    let quote = |tier: i64| rt.call_method(&pricing, "quote", vec![tier.into()]).unwrap();

    rt.overrides().when(RATE_SITE).with_args(vec![eq(1)]).returns(100);
    rt.overrides().when(RATE_SITE).with_args(vec![any()]).returns(5);
    assert_eq!(quote(1), Value::Integer(100));
    assert_eq!(quote(2), Value::Integer(5));

    rt.overrides().clear();
    rt.overrides().when(RATE_SITE).with_args(vec![any()]).returns(5);
    rt.overrides().when(RATE_SITE).with_args(vec![eq(1)]).returns(100);
    assert_eq!(quote(1), Value::Integer(5));
}

#[test]
fn test_override_is_scoped_to_one_instance() {
    let rt = instrumented_runtime(PRICING);
    let a = rt.instantiate("Pricing", vec![]).unwrap();
    let b = rt.instantiate("Pricing", vec![]).unwrap();

    rt.overrides().when(RATE_SITE).on(a.object_id().unwrap()).returns(0);
    assert_eq!(rt.call_method(&a, "quote", vec![3.into()]).unwrap(), Value::Integer(0));
    assert_eq!(rt.call_method(&b, "quote", vec![3.into()]).unwrap(), Value::Integer(3));
}

#[test]
fn test_recorded_invocations() {
    let rt = instrumented_runtime(PRICING);
    let pricing = rt.instantiate("Pricing", vec![]).unwrap();
    let site = SiteId::from(RATE_SITE);
    rt.overrides().set_recording(true);
    rt.overrides().when(RATE_SITE).with_args(vec![eq(2)]).returns(7);

    rt.call_method(&pricing, "quote", vec![1.into()]).unwrap();
    rt.call_method(&pricing, "quote", vec![2.into()]).unwrap();

    let calls = rt.overrides().invocations(&site);
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].args, vec![Value::Integer(1)]);
    assert!(!calls[0].overridden);
    assert!(calls[1].overridden);
    assert_eq!(calls[1].instance, pricing.object_id());
}

#[test]
fn test_collection_matchers_scan_elements() {
    let strings = Value::list(vec!["a".into(), "b".into()]);
    let mixed = Value::list(vec!["a".into(), 2.into()]);
    assert!(any_list_of(TypeRef::Str).matches(&strings));
    assert!(!any_list_of(TypeRef::Str).matches(&mixed));

    let counts = Value::map(vec![("a".into(), 1.into())]);
    let labels = Value::map(vec![("a".into(), "b".into())]);
    assert!(any_map_of(TypeRef::Str, TypeRef::Int).matches(&counts));
    assert!(!any_map_of(TypeRef::Str, TypeRef::Int).matches(&labels));

    // The scan sees the elements present at match time
    let matcher = any_list_of(TypeRef::Str);
    assert!(matcher.matches(&strings));
    if let Value::List(items) = &strings {
        items.write().push(Value::Integer(3));
    }
    assert!(!matcher.matches(&strings));
}

#[test]
fn test_collection_matcher_selects_override() {
    let rt = instrumented_runtime(
        r#"
        @Instrument
        class Tags {
            private int count(List<String> tags) { return tags.size(); }
            int total(List<String> tags) { return count(tags); }
        }
        "#,
    );
    let tags = rt.instantiate("Tags", vec![]).unwrap();
    rt.overrides()
        .when("Tags#total(List)/call:Tags.count(List)#0")
        .with_args(vec![any_list_of(TypeRef::Str)])
        .returns(-1);

    let all_strings = Value::list(vec!["a".into(), "b".into()]);
    let mixed = Value::list(vec!["a".into(), 2.into()]);
    assert_eq!(rt.call_method(&tags, "total", vec![all_strings]).unwrap(), Value::Integer(-1));
    assert_eq!(rt.call_method(&tags, "total", vec![mixed]).unwrap(), Value::Integer(2));
}

const STORE: &str = r#"
@Instrument
class Widget {
    int base;
    Widget(int base) { this.base = base; }
    int price() { return base * 2; }
}

class FakeWidget extends Widget {
    int price() { return 7; }
}

@Instrument
class Store {
    Widget make(int x) { return new Widget(x); }
    int priceOf(int x) {
        Widget w = new Widget(x);
        return w.price() + w.price();
    }
}
"#;

#[test]
fn test_construction_override_replaces_instance() {
    let rt = instrumented_runtime(STORE);
    let store = rt.instantiate("Store", vec![]).unwrap();
    assert_eq!(rt.call_method(&store, "priceOf", vec![5.into()]).unwrap(), Value::Integer(20));

    let fake = rt.instantiate("FakeWidget", vec![]).unwrap();
    rt.overrides()
        .when("Store#priceOf(int)/new:Widget.<init>(int)#0")
        .returns(fake.clone());
    rt.overrides()
        .when("Store#make(int)/new:Widget.<init>(int)#0")
        .returns(fake.clone());

    assert_eq!(rt.call_method(&store, "priceOf", vec![5.into()]).unwrap(), Value::Integer(14));
    let made = rt.call_method(&store, "make", vec![5.into()]).unwrap();
    assert_eq!(made.object_id(), fake.object_id());
    assert_eq!(rt.call_method(&made, "price", vec![]).unwrap(), Value::Integer(7));
}

#[test]
fn test_construction_override_must_fit_the_site() {
    let rt = instrumented_runtime(STORE);
    let store = rt.instantiate("Store", vec![]).unwrap();
    rt.overrides()
        .when("Store#make(int)/new:Widget.<init>(int)#0")
        .returns("not a widget");

    match rt.call_method(&store, "make", vec![1.into()]) {
        Err(EvaluatorError::Thrown { class, .. }) => assert_eq!(class, "ClassCastException"),
        other => panic!("expected ClassCastException, got {other:?}"),
    }
}

const LIMITS: &str = r#"
@Instrument
class Limits {
    static int limit = 10;
    static int readLimit() { return limit; }
    static void setLimit(int value) { limit = value; }
}

class Reader {
    static int peek() { return Limits.limit; }
}
"#;

#[test]
fn test_static_read_override_leaves_storage_alone() {
    let rt = instrumented_runtime(LIMITS);
    rt.overrides().when("Limits#readLimit()/get:Limits.limit#0").returns(99);

    assert_eq!(rt.call_static("Limits", "readLimit", vec![]).unwrap(), Value::Integer(99));
    rt.call_static("Limits", "setLimit", vec![5.into()]).unwrap();

    assert_eq!(rt.call_static("Reader", "peek", vec![]).unwrap(), Value::Integer(5));
    assert_eq!(rt.get_static("Limits", "limit"), Some(Value::Integer(5)));
    assert_eq!(rt.call_static("Limits", "readLimit", vec![]).unwrap(), Value::Integer(99));

    rt.overrides().clear();
    assert_eq!(rt.call_static("Limits", "readLimit", vec![]).unwrap(), Value::Integer(5));
}

#[test]
fn test_overrides_are_portable_to_load_time_instrumentation() {
    let (unit, output) = build(PRICING);
    let built = output.manifests().next().unwrap().clone();
    assert_eq!(built.origin, ManifestOrigin::BuildTime);

    let rt = Runtime::new();
    let loaded = rt.load_unit(&unit).unwrap();
    assert_eq!(loaded[0].origin, ManifestOrigin::LoadTime);
    assert_eq!(loaded[0].sites, built.sites);

    let pricing = rt.instantiate("Pricing", vec![]).unwrap();
    rt.overrides().when(built.sites[0].id.clone()).returns(42);
    assert_eq!(rt.call_method(&pricing, "quote", vec![1.into()]).unwrap(), Value::Integer(42));
}

#[test]
fn test_concurrent_lookups_share_one_table() {
    let rt = instrumented_runtime(PRICING);
    let instances: Vec<Value> = (0..4).map(|_| rt.instantiate("Pricing", vec![]).unwrap()).collect();
    for (n, instance) in instances.iter().enumerate() {
        rt.overrides()
            .when(RATE_SITE)
            .on(instance.object_id().unwrap())
            .returns(n as i64 * 10);
    }

    std::thread::scope(|scope| {
        for (n, instance) in instances.iter().enumerate() {
            let rt = &rt;
            scope.spawn(move || {
                for _ in 0..50 {
                    let value = rt.call_method(instance, "quote", vec![1.into()]).unwrap();
                    assert_eq!(value, Value::Integer(n as i64 * 10));
                }
            });
        }
    });
}

#[test]
fn test_scoped_overrides_clear_on_drop() {
    let rt = instrumented_runtime(PRICING);
    let pricing = rt.instantiate("Pricing", vec![]).unwrap();
    {
        let overrides = rt.overrides().scoped();
        overrides.when(RATE_SITE).returns(9);
        assert_eq!(rt.call_method(&pricing, "quote", vec![1.into()]).unwrap(), Value::Integer(9));
    }
    assert!(rt.overrides().is_empty());
    assert_eq!(rt.call_method(&pricing, "quote", vec![1.into()]).unwrap(), Value::Integer(1));
}
