// File: src/serialize.rs
//
// COSMO bytecode dump/undump (§4.7, §6 "Bytecode format"). Every 32-bit
// integer — lengths, counts, instruction words alike — is written in the
// producing host's native byte order; the header's endian byte records
// which order that was, and `undump` swaps bytes back when it disagrees
// with the current host. Instruction words get one extra pass after the
// swap: `decode_opcode`/`layout_of` reinterpret the corrected word's
// opcode and Ax fields and re-encode them canonically, so a biased
// `iAxs` argument reconstructs through the same path the compiler used
// to produce it rather than relying on a raw swap alone (§4.7).
//
// Doubles are the one exception: written and read as raw bytes, never
// swapped, a portability caveat the spec calls out explicitly.

use crate::gc::Heap;
use crate::object::{GFunction, Obj, ObjRef};
use crate::opcode::{decode_ax, decode_axs, decode_opcode, encode_i, encode_iax, encode_iaxs, layout_of, Layout};
use crate::value::Value;

const MAGIC: &[u8; 5] = b"COSMO";
const VERSION: u8 = 0x01;

const HOST_IS_BIG_ENDIAN: bool = cfg!(target_endian = "big");

const TAG_NIL: u8 = 0;
const TAG_BOOLEAN: u8 = 1;
const TAG_NUMBER: u8 = 2;
const TAG_CHARACTER: u8 = 3;
const TAG_STRING: u8 = 4;
const TAG_FUNCTION: u8 = 5;

pub fn dump(func_ref: ObjRef, heap: &Heap) -> Result<Vec<u8>, String> {
    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);
    out.push(VERSION);
    out.push(HOST_IS_BIG_ENDIAN as u8);
    write_function(&mut out, func_ref, heap)?;
    Ok(out)
}

pub fn undump(bytes: &[u8], heap: &mut Heap) -> Result<ObjRef, String> {
    let mut r = Reader::new(bytes);
    let magic = r.take(5)?;
    if magic != MAGIC.as_slice() {
        return Err("not a COSMO bytecode file".to_string());
    }
    let version = r.byte()?;
    if version != VERSION {
        return Err(format!("unsupported bytecode version {}", version));
    }
    let source_is_big = r.byte()? != 0;
    let swap = source_is_big != HOST_IS_BIG_ENDIAN;
    read_function(&mut r, heap, swap)
}

// --- writing ---

fn write_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_ne_bytes());
}

fn write_string(out: &mut Vec<u8>, s: &str) {
    write_u32(out, s.len() as u32);
    out.extend_from_slice(s.as_bytes());
}

fn write_value(out: &mut Vec<u8>, value: &Value, heap: &Heap) -> Result<(), String> {
    match value {
        Value::Nil => out.push(TAG_NIL),
        Value::Boolean(b) => {
            out.push(TAG_BOOLEAN);
            out.push(*b as u8);
        }
        Value::Number(n) => {
            out.push(TAG_NUMBER);
            out.extend_from_slice(&n.to_ne_bytes());
        }
        Value::Character(c) => {
            out.push(TAG_CHARACTER);
            out.push(*c);
        }
        Value::Object(r) => match heap.get(*r) {
            Obj::String(s) => {
                out.push(TAG_STRING);
                write_string(out, s);
            }
            Obj::Function(_) => {
                out.push(TAG_FUNCTION);
                write_function(out, *r, heap)?;
            }
            other => return Err(format!("constant of kind '{}' cannot be serialized", other.type_name())),
        },
    }
    Ok(())
}

fn write_function(out: &mut Vec<u8>, func_ref: ObjRef, heap: &Heap) -> Result<(), String> {
    let func = heap.get(func_ref).as_function().expect("write_function requires a Function ref");

    match &func.name {
        Some(name) => {
            out.push(1);
            write_string(out, name);
        }
        None => out.push(0),
    }
    out.push(func.arity);
    out.push(func.upvalue_count);
    out.push(func.embedded as u8);

    write_u32(out, func.chunk.identifiers.len() as u32);
    for id in &func.chunk.identifiers {
        let name = heap.get(*id).as_string().expect("identifiers are always interned strings");
        write_string(out, name);
    }

    write_u32(out, func.chunk.constants.len() as u32);
    for c in &func.chunk.constants {
        write_value(out, c, heap)?;
    }

    write_u32(out, func.chunk.lines.len() as u32);
    for line in &func.chunk.lines {
        write_u32(out, *line);
    }

    write_u32(out, func.chunk.code.len() as u32);
    for word in &func.chunk.code {
        write_u32(out, *word);
    }

    Ok(())
}

// --- reading ---

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Reader { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], String> {
        let end = self.pos.checked_add(n).filter(|&e| e <= self.bytes.len());
        match end {
            Some(end) => {
                let slice = &self.bytes[self.pos..end];
                self.pos = end;
                Ok(slice)
            }
            None => Err("unexpected end of bytecode".to_string()),
        }
    }

    fn byte(&mut self) -> Result<u8, String> {
        Ok(self.take(1)?[0])
    }

    fn u32_raw(&mut self) -> Result<u32, String> {
        let bytes: [u8; 4] = self.take(4)?.try_into().expect("take(4) returns 4 bytes");
        Ok(u32::from_ne_bytes(bytes))
    }

    fn u32(&mut self, swap: bool) -> Result<u32, String> {
        let value = self.u32_raw()?;
        Ok(if swap { value.swap_bytes() } else { value })
    }

    fn f64_raw(&mut self) -> Result<f64, String> {
        let bytes: [u8; 8] = self.take(8)?.try_into().expect("take(8) returns 8 bytes");
        Ok(f64::from_ne_bytes(bytes))
    }

    fn string(&mut self, swap: bool) -> Result<String, String> {
        let len = self.u32(swap)? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|e| format!("bytecode string is not valid utf-8: {}", e))
    }
}

/// Re-derives the canonical encoding for an instruction word after a
/// possible endian swap, per §4.7's per-opcode-family rewrite.
fn rewrite_instruction(word: u32) -> Result<u32, String> {
    let op = decode_opcode(word).map_err(|e| format!("corrupt bytecode: {}", e))?;
    Ok(match layout_of(op) {
        Layout::I => encode_i(op),
        Layout::IAx => encode_iax(op, decode_ax(word)),
        Layout::IAxs => encode_iaxs(op, decode_axs(word)),
    })
}

fn read_value(r: &mut Reader, heap: &mut Heap, swap: bool) -> Result<Value, String> {
    let tag = r.byte()?;
    Ok(match tag {
        TAG_NIL => Value::Nil,
        TAG_BOOLEAN => Value::Boolean(r.byte()? != 0),
        TAG_NUMBER => Value::Number(r.f64_raw()?),
        TAG_CHARACTER => Value::Character(r.byte()?),
        TAG_STRING => Value::Object(heap.intern_string(&r.string(swap)?)),
        TAG_FUNCTION => Value::Object(read_function(r, heap, swap)?),
        other => return Err(format!("unknown constant tag {}", other)),
    })
}

fn read_function(r: &mut Reader, heap: &mut Heap, swap: bool) -> Result<ObjRef, String> {
    let name = if r.byte()? != 0 { Some(r.string(swap)?.into_boxed_str()) } else { None };
    let arity = r.byte()?;
    let upvalue_count = r.byte()?;
    let embedded = r.byte()? != 0;

    let identifier_count = r.u32(swap)?;
    let mut identifiers = Vec::with_capacity(identifier_count as usize);
    for _ in 0..identifier_count {
        identifiers.push(heap.intern_string(&r.string(swap)?));
    }

    let constant_count = r.u32(swap)?;
    let mut constants = Vec::with_capacity(constant_count as usize);
    for _ in 0..constant_count {
        constants.push(read_value(r, heap, swap)?);
    }

    let line_count = r.u32(swap)?;
    let mut lines = Vec::with_capacity(line_count as usize);
    for _ in 0..line_count {
        lines.push(r.u32(swap)?);
    }

    let code_count = r.u32(swap)?;
    let mut code = Vec::with_capacity(code_count as usize);
    for _ in 0..code_count {
        code.push(rewrite_instruction(r.u32(swap)?)?);
    }

    let chunk = crate::chunk::Chunk { code, lines, constants, identifiers };
    Ok(heap.alloc(Obj::Function(GFunction { name, arity, upvalue_count, chunk, embedded })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use crate::vm::Vm;

    #[test]
    fn round_trips_a_simple_function() {
        let mut vm = Vm::new();
        let func_ref = compile("var x = 1\nvar y = x + 41", &mut vm.heap).unwrap();
        let bytes = dump(func_ref, &vm.heap).unwrap();

        let mut vm2 = Vm::new();
        let loaded_ref = undump(&bytes, &mut vm2.heap).unwrap();
        vm2.run_function(loaded_ref).unwrap();
        assert_eq!(vm2.get_global("y"), Some(Value::Number(42.0)));
    }

    #[test]
    fn round_trips_nested_functions_and_closures() {
        let mut vm = Vm::new();
        let src = "function make() local c = 0 function inc() c = c + 1 return c end return inc end\nglobal f = make()\nglobal a = f()\nglobal b = f()";
        let func_ref = compile(src, &mut vm.heap).unwrap();
        let bytes = dump(func_ref, &vm.heap).unwrap();

        let mut vm2 = Vm::new();
        let loaded_ref = undump(&bytes, &mut vm2.heap).unwrap();
        vm2.run_function(loaded_ref).unwrap();
        assert_eq!(vm2.get_global("a"), Some(Value::Number(1.0)));
        assert_eq!(vm2.get_global("b"), Some(Value::Number(2.0)));
    }

    #[test]
    fn rejects_bad_magic() {
        let err = undump(b"NOPE!", &mut Heap::new()).unwrap_err();
        assert!(err.contains("COSMO"));
    }

    #[test]
    fn opposite_endian_word_reconstructs_through_swap_and_rewrite() {
        // A word produced by a host of the opposite endianness shows up as
        // `word.swap_bytes()` in the raw buffer; the reader's swap pass
        // recovers `word`, and rewrite_instruction re-derives the same
        // canonical encoding from its opcode and Ax fields (scenario 6, §8).
        let word = crate::opcode::encode_iaxs(crate::opcode::OpCode::Jump, -17);
        let raw_on_wire = word.swap_bytes();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&raw_on_wire.to_ne_bytes());
        let mut r = Reader::new(&bytes);
        let recovered = r.u32(true).unwrap();
        assert_eq!(rewrite_instruction(recovered).unwrap(), word);
    }

    #[test]
    fn undump_rejects_wrong_version() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MAGIC);
        bytes.push(0xFF);
        bytes.push(0);
        let err = undump(&bytes, &mut Heap::new()).unwrap_err();
        assert!(err.contains("version"));
    }
}
