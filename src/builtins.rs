// File: src/builtins.rs
//
// The host-callable standard library surface (§1: "peripheral glue...
// out of scope except where the core must expose hooks for it"). A
// handful of CFunctions registered into a fresh `Vm`'s globals, trimmed
// to what the spec's own end-to-end scenarios (§8) call: `print`,
// `type`, `len`, `tostring`.

use crate::object::{Obj, Objection};
use crate::value::Value;
use crate::vm::Vm;

/// Registers the standard library into `vm`'s globals. Call once per `Vm`.
pub fn install(vm: &mut Vm) {
    vm.register_cfunction("print", std::rc::Rc::new(print));
    vm.register_cfunction("type", std::rc::Rc::new(type_of));
    vm.register_cfunction("len", std::rc::Rc::new(len));
    vm.register_cfunction("tostring", std::rc::Rc::new(tostring));
}

fn print(vm: &mut Vm, args: &[Value]) -> Result<Value, String> {
    let rendered: Vec<String> = args.iter().map(|v| vm.heap.display_value(v)).collect();
    println!("{}", rendered.join("\t"));
    Ok(Value::Nil)
}

fn type_of(_vm: &mut Vm, args: &[Value]) -> Result<Value, String> {
    let v = args.first().copied().unwrap_or(Value::Nil);
    let name = match v {
        Value::Object(r) => match _vm.heap.get(r) {
            Obj::CFunction(_) | Obj::Closure(_) | Obj::Function(_) | Obj::BoundCall(_) => "function",
            other => other.type_name(),
        },
        other => other.type_name(),
    };
    Ok(Value::Object(_vm.heap.intern_string(name)))
}

fn len(vm: &mut Vm, args: &[Value]) -> Result<Value, String> {
    let v = args.first().copied().unwrap_or(Value::Nil);
    match v {
        Value::Object(r) => match vm.heap.get(r) {
            Obj::String(s) => Ok(Value::Number(s.len() as f64)),
            Obj::Table(t) => Ok(Value::Number(t.len() as f64)),
            other => Err(format!("len: expected a string or table, got {}", other.type_name())),
        },
        other => Err(format!("len: expected a string or table, got {}", other.type_name())),
    }
}

fn tostring(vm: &mut Vm, args: &[Value]) -> Result<Value, String> {
    let v = args.first().copied().unwrap_or(Value::Nil);
    let s = vm.heap.display_value(&v);
    Ok(Value::Object(vm.heap.intern_string(&s)))
}

/// Raises an Objection from a host callback body, mirroring the Objection
/// constructor the VM itself uses (§7: "Callbacks may raise Objections").
pub fn raise_host_error(message: impl Into<String>) -> Objection {
    Objection::new(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;

    fn run(src: &str) -> Vm {
        let mut vm = Vm::new();
        install(&mut vm);
        let func_ref = compile(src, &mut vm.heap).unwrap();
        vm.run_function(func_ref).unwrap();
        vm
    }

    #[test]
    fn type_reports_tag_names() {
        let mut vm = run("global a = type(1)\nglobal b = type(\"x\")\nglobal c = type(nil)\nglobal d = type(print)");
        assert_eq!(vm.heap.display_value(&vm.get_global("a").unwrap()), "number");
        assert_eq!(vm.heap.display_value(&vm.get_global("b").unwrap()), "string");
        assert_eq!(vm.heap.display_value(&vm.get_global("c").unwrap()), "nil");
        assert_eq!(vm.heap.display_value(&vm.get_global("d").unwrap()), "function");
    }

    #[test]
    fn len_covers_strings_and_tables() {
        let mut vm = run("global a = len(\"hello\")\nglobal b = len({ x: 1, y: 2 })");
        assert_eq!(vm.get_global("a"), Some(Value::Number(5.0)));
        assert_eq!(vm.get_global("b"), Some(Value::Number(2.0)));
    }

    #[test]
    fn tostring_formats_numbers_without_trailing_zero() {
        let mut vm = run("global s = tostring(42)");
        assert_eq!(vm.heap.display_value(&vm.get_global("s").unwrap()), "42");
    }
}
