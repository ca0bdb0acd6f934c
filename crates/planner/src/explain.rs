use crate::pipeline::{AggExpr, Configurable, FunctionCall, Pipeline, Stage};
use crate::window::Window;

/// Render a compiled fragment (and its join sub-fragments) as multiline text.
pub fn explain_pipeline(pipeline: &Pipeline) -> String {
    let mut s = String::new();
    fmt_pipeline(pipeline, 0, &mut s);
    s
}

fn fmt_pipeline(p: &Pipeline, indent: usize, out: &mut String) {
    let pad = "  ".repeat(indent);
    out.push_str(&format!("{pad}Pipeline {}.{}", p.namespace, p.name));
    if let Some(dep) = &p.dependency {
        out.push_str(&format!(" dependency={dep}"));
    }
    if let Some(src) = &p.msg_source_name {
        out.push_str(&format!(" source={src}"));
    }
    if p.is_break {
        out.push_str(" break");
    }
    out.push('\n');
    if !p.configurables.is_empty() {
        let names = p
            .configurables
            .iter()
            .map(fmt_configurable)
            .collect::<Vec<_>>()
            .join(", ");
        out.push_str(&format!("{pad}  configurables=[{names}]\n"));
    }
    for stage in &p.stages {
        fmt_stage(stage, indent + 1, out);
    }
}

fn fmt_stage(stage: &Stage, indent: usize, out: &mut String) {
    let pad = "  ".repeat(indent);
    match stage {
        Stage::Source(s) => {
            out.push_str(&format!("{pad}Source table={}", s.table));
            if let Some(alias) = &s.as_name {
                out.push_str(&format!(" as={alias}"));
            }
            out.push('\n');
        }
        Stage::Filter(f) => out.push_str(&format!("{pad}Filter {}\n", f.predicate)),
        Stage::DimensionJoin(d) => out.push_str(&format!(
            "{pad}DimensionJoin table={} type={} on={}\n",
            d.table,
            d.join_type,
            d.condition.content()
        )),
        Stage::LateralJoin(l) => out.push_str(&format!(
            "{pad}LateralJoin function={}({}) type={} fields={:?}\n",
            l.function,
            l.args.join(", "),
            l.join_type,
            l.fields
        )),
        Stage::WindowEmit(w) => out.push_str(&format!("{pad}WindowEmit window={}\n", w.window.name())),
        Stage::Join(j) => {
            out.push_str(&format!(
                "{pad}Join {} right_dependency={}\n",
                fmt_window(&j.window),
                j.right_dependent_table
            ));
            out.push_str(&format!("{pad}  left:\n"));
            fmt_pipeline(&j.left, indent + 2, out);
            out.push_str(&format!("{pad}  right:\n"));
            fmt_pipeline(&j.right, indent + 2, out);
        }
        Stage::RightJoinRef(r) => {
            out.push_str(&format!("{pad}RightJoinRef pipeline={}\n", r.pipeline_name))
        }
        Stage::GroupBy(g) => {
            let keys = g.keys.iter().map(|k| k.to_string()).collect::<Vec<_>>();
            out.push_str(&format!("{pad}GroupBy keys={keys:?}\n"));
            for (agg, name) in &g.aggregates {
                out.push_str(&format!("{pad}  {name} := {}\n", fmt_agg(agg)));
            }
            fmt_functions(&g.functions, &pad, out);
        }
        Stage::Enrich(e) => {
            out.push_str(&format!("{pad}Enrich\n"));
            fmt_functions(&e.functions, &pad, out);
        }
        Stage::Having(h) => out.push_str(&format!("{pad}Having {}\n", h.predicate)),
    }
}

fn fmt_functions(functions: &[FunctionCall], pad: &str, out: &mut String) {
    for f in functions {
        out.push_str(&format!(
            "{pad}  {} := {}({})\n",
            f.output,
            f.function,
            f.args.join(", ")
        ));
    }
}

fn fmt_window(w: &Window) -> String {
    let mut s = format!(
        "window={} type={} left_keys={:?} right_keys={:?}",
        w.name(),
        w.join_type(),
        w.left_join_field_names(),
        w.right_join_field_names()
    );
    if let Some(residual) = w.residual() {
        s.push_str(&format!(" residual=({})", residual.content()));
    }
    s
}

fn fmt_configurable(c: &Configurable) -> String {
    match c {
        Configurable::Window(w) => format!("window:{}", w.name()),
        Configurable::Filter(f) => format!("filter:{}", f.label),
    }
}

fn fmt_agg(a: &AggExpr) -> String {
    match a {
        AggExpr::Count(f) => format!("count({f})"),
        AggExpr::Sum(f) => format!("sum({f})"),
        AggExpr::Min(f) => format!("min({f})"),
        AggExpr::Max(f) => format!("max({f})"),
        AggExpr::Avg(f) => format!("avg({f})"),
    }
}
