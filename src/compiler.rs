// File: src/compiler.rs
//
// A single-pass Pratt compiler (§4.5): lexing, parsing, and codegen all
// happen in one walk, with no intermediate AST. Precedence climbing is
// expressed as a match over `TokenKind` rather than a literal table of
// function pointers — the idiomatic Rust translation of the same
// algorithm, since storing method pointers alongside `&mut self` fights
// the borrow checker for no benefit.
//
// Nested function literals share the lexer cursor (per §4.5) by pushing a
// new `FuncScope` onto `self.scopes` rather than recursing into a fresh
// parser instance.

use crate::chunk::Chunk;
use crate::gc::Heap;
use crate::lexer::{Lexer, Token, TokenKind};
use crate::object::{GFunction, Obj, Objection, ObjRef};
use crate::opcode::{encode_i, encode_iax, encode_iaxs, OpCode};
use crate::value::Value;

type CResult<T> = Result<T, ()>;

#[derive(Clone, Copy, PartialEq, PartialOrd, Debug)]
enum Prec {
    None,
    Assignment,
    Or,
    And,
    Equality,
    Comparison,
    Concat,
    Additive,
    Multiplicative,
    Unary,
    Call,
    Primary,
}

fn infix_precedence(kind: &TokenKind) -> Prec {
    use TokenKind::*;
    match kind {
        Or => Prec::Or,
        And => Prec::And,
        EqEq | NotEq => Prec::Equality,
        Lt | Le | Gt | Ge => Prec::Comparison,
        DotDot => Prec::Concat,
        Plus | Minus => Prec::Additive,
        Star | Slash | Percent => Prec::Multiplicative,
        Dot | LBracket | LParen => Prec::Call,
        _ => Prec::None,
    }
}

struct Local {
    name: String,
    depth: i32,
}

struct UpvalueDesc {
    index: u8,
    is_local: bool,
}

struct FuncScope {
    chunk: Chunk,
    locals: Vec<Local>,
    scope_depth: i32,
    upvalues: Vec<UpvalueDesc>,
    name: Option<String>,
    arity: u8,
    embedded: bool,
    stack_effect: i64,
}

impl FuncScope {
    fn new(name: Option<String>, embedded: bool) -> Self {
        FuncScope {
            chunk: Chunk::new(),
            locals: vec![Local { name: String::new(), depth: 0 }],
            scope_depth: 0,
            upvalues: Vec::new(),
            name,
            arity: 0,
            embedded,
            stack_effect: 0,
        }
    }
}

#[derive(Clone, Copy)]
enum VarKind {
    Local(u8),
    Upvalue(u8),
    Global(u32),
}

pub struct Compiler<'src, 'h> {
    lexer: Lexer<'src>,
    heap: &'h mut Heap,
    previous: Token,
    current: Token,
    had_error: bool,
    panic_mode: bool,
    objection: Option<Objection>,
    scopes: Vec<FuncScope>,
}

/// Compiles `source` into the root `_MAIN` Function, returning an `ObjRef`
/// to it on success or the first `Objection` raised during compilation.
pub fn compile(source: &str, heap: &mut Heap) -> Result<ObjRef, Objection> {
    let dummy = Token { kind: TokenKind::Eof, line: 0 };
    let mut compiler = Compiler {
        lexer: Lexer::new(source),
        heap,
        previous: dummy.clone(),
        current: dummy,
        had_error: false,
        panic_mode: false,
        objection: None,
        scopes: vec![FuncScope::new(Some("_MAIN".to_string()), false)],
    };
    let _ = compiler.advance();
    let _ = compiler.statement_list(&[TokenKind::Eof]);
    let end_line = compiler.previous.line;
    compiler.emit_i(OpCode::End, 0, end_line);

    if compiler.had_error {
        return Err(compiler.objection.take().unwrap_or_else(|| Objection::new("compile error")));
    }

    let root = compiler.scopes.pop().expect("root scope always present");
    let upvalue_count = root.upvalues.len() as u8;
    let func = GFunction {
        name: root.name.map(|n| n.into_boxed_str()),
        arity: root.arity,
        upvalue_count,
        chunk: root.chunk,
        embedded: false,
    };
    Ok(compiler.heap.alloc(Obj::Function(func)))
}

impl<'src, 'h> Compiler<'src, 'h> {
    fn current_scope(&self) -> &FuncScope {
        self.scopes.last().expect("at least one scope is always active")
    }

    fn current_scope_mut(&mut self) -> &mut FuncScope {
        self.scopes.last_mut().expect("at least one scope is always active")
    }

    fn current_chunk_mut(&mut self) -> &mut Chunk {
        &mut self.current_scope_mut().chunk
    }

    // --- token stream plumbing ---

    fn advance(&mut self) -> CResult<()> {
        self.previous = self.current.clone();
        loop {
            match self.lexer.next_token() {
                Ok(tok) => {
                    self.current = tok;
                    break;
                }
                Err(msg) => self.error_at_current(&msg),
            }
        }
        Ok(())
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(&self.current.kind) == std::mem::discriminant(kind)
    }

    fn matches(&mut self, kind: &TokenKind) -> CResult<bool> {
        if self.check(kind) {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn consume(&mut self, kind: &TokenKind, msg: &str) -> CResult<()> {
        if self.check(kind) {
            self.advance()
        } else {
            self.error_at_current(msg);
            Err(())
        }
    }

    fn skip_newlines(&mut self) -> CResult<()> {
        while matches!(self.current.kind, TokenKind::Newline | TokenKind::Semicolon) {
            self.advance()?;
        }
        Ok(())
    }

    fn consume_statement_end(&mut self) -> CResult<()> {
        if matches!(self.current.kind, TokenKind::Newline | TokenKind::Semicolon) {
            self.advance()?;
        }
        Ok(())
    }

    fn error_at_current(&mut self, msg: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;
        self.objection = Some(Objection::compile_error(msg.to_string(), self.current.line));
    }

    fn error(&mut self, msg: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;
        self.objection = Some(Objection::compile_error(msg.to_string(), self.previous.line));
    }

    fn synchronize(&mut self) {
        while !matches!(self.current.kind, TokenKind::Eof) {
            if self.advance().is_err() {
                break;
            }
        }
    }

    // --- emission ---

    fn emit_word(&mut self, word: u32, delta: i64, line: u32) -> usize {
        let site = self.current_chunk_mut().write(word, line);
        self.current_scope_mut().stack_effect += delta;
        site
    }

    fn emit_i(&mut self, op: OpCode, delta: i64, line: u32) -> usize {
        self.emit_word(encode_i(op), delta, line)
    }

    fn emit_iax(&mut self, op: OpCode, ax: u32, delta: i64, line: u32) -> usize {
        self.emit_word(encode_iax(op, ax), delta, line)
    }

    fn emit_jump_placeholder(&mut self, op: OpCode, delta: i64, line: u32) -> usize {
        self.emit_word(encode_iaxs(op, 0), delta, line)
    }

    fn patch_jump_here(&mut self, site: usize) {
        let target = self.current_chunk_mut().here();
        self.current_chunk_mut().patch_jump(site, target);
    }

    fn emit_constant(&mut self, value: Value, line: u32) {
        let idx = self.current_chunk_mut().add_constant(value);
        self.emit_iax(OpCode::LoadConstant, idx, 1, line);
    }

    fn intern(&mut self, s: &str) -> ObjRef {
        self.heap.intern_string(s)
    }

    // --- variable resolution ---

    fn resolve_local(&mut self, name: &str) -> Option<u8> {
        let scope = self.current_scope();
        for (i, local) in scope.locals.iter().enumerate().rev() {
            if local.name == name {
                if local.depth == -1 {
                    self.error("can't reference a local in its own initializer");
                    return None;
                }
                return Some(i as u8);
            }
        }
        None
    }

    fn resolve_variable(&mut self, name: &str) -> VarKind {
        if let Some(slot) = self.resolve_local(name) {
            return VarKind::Local(slot);
        }
        let idx = self.scopes.len() - 1;
        if let Some(up) = resolve_upvalue(&mut self.scopes, idx, name) {
            return VarKind::Upvalue(up);
        }
        let name_ref = self.intern(name);
        let global_idx = self.current_chunk_mut().add_identifier(name_ref);
        VarKind::Global(global_idx)
    }

    fn emit_get(&mut self, kind: VarKind, line: u32) {
        match kind {
            VarKind::Local(slot) => self.emit_iax(OpCode::GetBase, slot as u32, 1, line),
            VarKind::Upvalue(idx) => self.emit_iax(OpCode::GetUpvalue, idx as u32, 1, line),
            VarKind::Global(idx) => self.emit_iax(OpCode::GetGlobal, idx, 1, line),
        };
    }

    fn emit_set(&mut self, kind: VarKind, line: u32) {
        match kind {
            VarKind::Local(slot) => self.emit_iax(OpCode::SetBase, slot as u32, 0, line),
            VarKind::Upvalue(idx) => self.emit_iax(OpCode::SetUpvalue, idx as u32, 0, line),
            VarKind::Global(idx) => self.emit_iax(OpCode::SetGlobal, idx, 0, line),
        };
    }

    fn declare_local_uninitialized(&mut self, name: String) {
        self.current_scope_mut().locals.push(Local { name, depth: -1 });
    }

    fn mark_local_initialized(&mut self) {
        let depth = self.current_scope().scope_depth;
        self.current_scope_mut().locals.last_mut().unwrap().depth = depth;
    }

    /// True only at the root `_MAIN` chunk's outermost block — i.e. not
    /// nested inside any function body, nor inside a `do`/`if`/`while`/`for`
    /// block. This is what `var`/bare `function` declarations mean by
    /// "picks based on scope depth" (§4.5): a function's own top-level
    /// statements are never implicitly global just because that function
    /// itself has block-depth 0.
    fn at_top_level(&self) -> bool {
        self.scopes.len() == 1 && self.current_scope().scope_depth == 0
    }

    fn begin_scope(&mut self) {
        self.current_scope_mut().scope_depth += 1;
    }

    fn end_scope(&mut self, line: u32) {
        let scope = self.current_scope_mut();
        scope.scope_depth -= 1;
        let depth = scope.scope_depth;
        let mut first_dropped: Option<usize> = None;
        let mut count = 0u32;
        while let Some(local) = scope.locals.last() {
            if local.depth > depth {
                first_dropped = Some(scope.locals.len() - 1);
                scope.locals.pop();
                count += 1;
            } else {
                break;
            }
        }
        if let Some(slot) = first_dropped {
            self.emit_iax(OpCode::CloseLocal, slot as u32, 0, line);
        }
        if count > 0 {
            self.emit_iax(OpCode::Pop, count, -(count as i64), line);
        }
    }

    // --- statements ---

    fn statement_list(&mut self, enders: &[TokenKind]) -> CResult<()> {
        loop {
            self.skip_newlines()?;
            if enders.iter().any(|e| self.check(e)) {
                return Ok(());
            }
            if matches!(self.current.kind, TokenKind::Eof) {
                return Ok(());
            }
            if self.panic_mode {
                self.synchronize();
                return Ok(());
            }
            self.statement()?;
        }
    }

    fn statement(&mut self) -> CResult<()> {
        match self.current.kind.clone() {
            TokenKind::Local | TokenKind::Global | TokenKind::Var => self.var_decl_statement(),
            TokenKind::If => self.if_statement(),
            TokenKind::While => self.while_statement(),
            TokenKind::For => self.for_statement(),
            TokenKind::Function => self.function_decl_statement(),
            TokenKind::Return => self.return_statement(),
            TokenKind::Do => self.do_block_statement(),
            _ => self.expression_statement(),
        }
    }

    fn var_decl_statement(&mut self) -> CResult<()> {
        let kind = self.current.kind.clone();
        self.advance()?;
        let line = self.previous.line;
        let name = match self.current.kind.clone() {
            TokenKind::Identifier(n) => {
                self.advance()?;
                n
            }
            _ => {
                self.error_at_current("expected variable name");
                return Err(());
            }
        };

        let is_global = match kind {
            TokenKind::Global => true,
            TokenKind::Local => false,
            TokenKind::Var => self.at_top_level(),
            _ => unreachable!(),
        };

        if !is_global {
            self.declare_local_uninitialized(name.clone());
        }

        if self.matches(&TokenKind::Eq)? {
            self.expression()?;
        } else {
            self.emit_i(OpCode::PushNil, 1, line);
        }

        if is_global {
            let name_ref = self.intern(&name);
            let idx = self.current_chunk_mut().add_identifier(name_ref);
            self.emit_iax(OpCode::DefineGlobal, idx, -1, line);
        } else {
            self.mark_local_initialized();
        }
        self.consume_statement_end()
    }

    fn function_decl_statement(&mut self) -> CResult<()> {
        self.advance()?; // consume 'function'
        let line = self.previous.line;
        let name = match self.current.kind.clone() {
            TokenKind::Identifier(n) => {
                self.advance()?;
                n
            }
            _ => {
                self.error_at_current("expected function name");
                return Err(());
            }
        };
        let is_global = self.at_top_level();
        if !is_global {
            // Marked initialized immediately (unlike a plain `local`): the
            // function's own body may refer to its name to recurse, and
            // unlike `local x = x` there is no risk of reading an
            // un-evaluated initializer since the body only runs on a later
            // call, never during its own compilation.
            self.declare_local_uninitialized(name.clone());
            self.mark_local_initialized();
        }
        self.function_body(Some(name.clone()), false, line)?;
        if is_global {
            let name_ref = self.intern(&name);
            let idx = self.current_chunk_mut().add_identifier(name_ref);
            self.emit_iax(OpCode::DefineGlobal, idx, -1, line);
        }
        Ok(())
    }

    fn return_statement(&mut self) -> CResult<()> {
        self.advance()?;
        let line = self.previous.line;
        if matches!(self.current.kind, TokenKind::Newline | TokenKind::Semicolon | TokenKind::End | TokenKind::Eof) {
            self.emit_i(OpCode::End, 0, line);
        } else {
            self.expression()?;
            self.emit_i(OpCode::Return, -1, line);
        }
        self.consume_statement_end()
    }

    fn do_block_statement(&mut self) -> CResult<()> {
        self.advance()?; // 'do'
        let line = self.previous.line;
        self.begin_scope();
        self.statement_list(&[TokenKind::End])?;
        self.consume(&TokenKind::End, "expected 'end' to close 'do' block")?;
        self.end_scope(line);
        self.consume_statement_end()
    }

    fn if_statement(&mut self) -> CResult<()> {
        self.advance()?; // 'if'
        let line = self.previous.line;
        self.expression()?;
        let mut pending_then_jump = self.emit_jump_placeholder(OpCode::IfJump, -1, line);
        self.begin_scope();
        self.statement_list(&[TokenKind::Elseif, TokenKind::Else, TokenKind::End])?;
        self.end_scope(line);

        let mut end_jumps = Vec::new();
        loop {
            match self.current.kind.clone() {
                TokenKind::Elseif => {
                    let jump_over = self.emit_jump_placeholder(OpCode::Jump, 0, line);
                    end_jumps.push(jump_over);
                    self.patch_jump_here(pending_then_jump);
                    self.advance()?;
                    self.expression()?;
                    pending_then_jump = self.emit_jump_placeholder(OpCode::IfJump, -1, line);
                    self.begin_scope();
                    self.statement_list(&[TokenKind::Elseif, TokenKind::Else, TokenKind::End])?;
                    self.end_scope(line);
                    continue;
                }
                TokenKind::Else => {
                    let jump_over = self.emit_jump_placeholder(OpCode::Jump, 0, line);
                    end_jumps.push(jump_over);
                    self.patch_jump_here(pending_then_jump);
                    self.advance()?;
                    self.begin_scope();
                    self.statement_list(&[TokenKind::End])?;
                    self.end_scope(line);
                    break;
                }
                _ => {
                    self.patch_jump_here(pending_then_jump);
                    break;
                }
            }
        }
        self.consume(&TokenKind::End, "expected 'end' to close 'if'")?;
        for j in end_jumps {
            self.patch_jump_here(j);
        }
        self.consume_statement_end()
    }

    fn while_statement(&mut self) -> CResult<()> {
        self.advance()?; // 'while'
        let line = self.previous.line;
        let loop_start = self.current_chunk_mut().here();
        self.expression()?;
        let exit_jump = self.emit_jump_placeholder(OpCode::IfJump, -1, line);
        self.consume(&TokenKind::Do, "expected 'do' after while condition")?;
        self.begin_scope();
        self.statement_list(&[TokenKind::End])?;
        self.end_scope(line);
        self.consume(&TokenKind::End, "expected 'end' to close 'while'")?;
        let back = self.current_chunk_mut().here() as i64 - loop_start as i64;
        self.emit_word(encode_iaxs(OpCode::JumpBack, -(back as i32)), 0, line);
        self.patch_jump_here(exit_jump);
        self.consume_statement_end()
    }

    fn for_statement(&mut self) -> CResult<()> {
        self.advance()?; // 'for'
        let line = self.previous.line;
        self.consume(&TokenKind::LParen, "expected '(' after 'for'")?;
        let first_name = match self.current.kind.clone() {
            TokenKind::Identifier(n) => {
                self.advance()?;
                n
            }
            _ => {
                self.error_at_current("expected identifier in 'for'");
                return Err(());
            }
        };

        if self.matches(&TokenKind::Comma)? {
            self.for_each_statement(first_name, line)
        } else if self.matches(&TokenKind::Eq)? {
            self.numeric_for_statement(first_name, line)
        } else {
            self.error_at_current("expected ',' or '=' in 'for'");
            Err(())
        }
    }

    fn numeric_for_statement(&mut self, var_name: String, line: u32) -> CResult<()> {
        self.begin_scope();
        self.declare_local_uninitialized(var_name);
        self.expression()?; // start
        self.mark_local_initialized();
        let loop_var_slot = (self.current_scope().locals.len() - 1) as u8;

        self.consume(&TokenKind::Comma, "expected ',' after 'for' start value")?;
        self.expression()?; // stop -> temp local
        self.declare_local_uninitialized("<for-stop>".to_string());
        self.mark_local_initialized();
        let stop_slot = (self.current_scope().locals.len() - 1) as u8;

        if self.matches(&TokenKind::Comma)? {
            self.expression()?;
        } else {
            self.emit_constant(Value::Number(1.0), line);
        }
        self.declare_local_uninitialized("<for-step>".to_string());
        self.mark_local_initialized();
        let step_slot = (self.current_scope().locals.len() - 1) as u8;

        self.consume(&TokenKind::RParen, "expected ')' to close 'for' header")?;
        self.consume(&TokenKind::Do, "expected 'do' after 'for' header")?;

        let loop_start = self.current_chunk_mut().here();
        // Continue iff (var - stop) * step < 0 — this single arithmetic
        // formula covers both ascending (step > 0) and descending
        // (step < 0) loops without a runtime branch: multiplying by step
        // flips the sign test exactly when the direction reverses.
        self.emit_iax(OpCode::GetBase, loop_var_slot as u32, 1, line);
        self.emit_iax(OpCode::GetBase, stop_slot as u32, 1, line);
        self.emit_i(OpCode::Sub, -1, line);
        self.emit_iax(OpCode::GetBase, step_slot as u32, 1, line);
        self.emit_i(OpCode::Mul, -1, line);
        self.emit_constant(Value::Number(0.0), line);
        self.emit_i(OpCode::Less, -1, line);
        let exit_jump = self.emit_jump_placeholder(OpCode::IfJump, -1, line);

        self.begin_scope();
        self.statement_list(&[TokenKind::End])?;
        self.end_scope(line);

        self.emit_iax(OpCode::GetBase, loop_var_slot as u32, 1, line);
        self.emit_iax(OpCode::GetBase, step_slot as u32, 1, line);
        self.emit_i(OpCode::Add, -1, line);
        self.emit_iax(OpCode::SetBase, loop_var_slot as u32, 0, line);
        self.emit_iax(OpCode::Pop, 1, -1, line);

        self.consume(&TokenKind::End, "expected 'end' to close 'for'")?;
        let back = self.current_chunk_mut().here() as i64 - loop_start as i64;
        self.emit_word(encode_iaxs(OpCode::JumpBack, -(back as i32)), 0, line);
        self.patch_jump_here(exit_jump);

        self.end_scope(line); // drops var/stop/step
        self.consume_statement_end()
    }

    fn for_each_statement(&mut self, key_name: String, line: u32) -> CResult<()> {
        let value_name = match self.current.kind.clone() {
            TokenKind::Identifier(n) => {
                self.advance()?;
                n
            }
            _ => {
                self.error_at_current("expected value identifier in for-each");
                return Err(());
            }
        };
        self.consume(&TokenKind::In, "expected 'in' in for-each")?;
        self.expression()?; // iterable, net +1
        self.consume(&TokenKind::RParen, "expected ')' to close for-each header")?;
        self.consume(&TokenKind::Do, "expected 'do' after for-each header")?;

        self.scopes.push(FuncScope::new(None, true));
        self.current_scope_mut().arity = 2;
        self.current_scope_mut().locals.push(Local { name: key_name, depth: 0 });
        self.current_scope_mut().locals.push(Local { name: value_name, depth: 0 });

        self.statement_list(&[TokenKind::End])?;
        self.emit_i(OpCode::End, 0, line);
        self.consume(&TokenKind::End, "expected 'end' to close for-each")?;

        let body_scope = self.scopes.pop().expect("for-each body scope was just pushed");
        let upvalues = body_scope.upvalues;
        let func = GFunction {
            name: Some("<for-each body>".into()),
            arity: body_scope.arity,
            upvalue_count: upvalues.len() as u8,
            chunk: body_scope.chunk,
            embedded: true,
        };
        let func_ref = self.heap.alloc(Obj::Function(func));
        let const_idx = self.current_chunk_mut().add_constant(Value::Object(func_ref));
        self.emit_iax(OpCode::MakeClosure, const_idx, 1, line);
        for up in &upvalues {
            let word = if up.is_local {
                encode_iax(OpCode::GetBase, up.index as u32)
            } else {
                encode_iax(OpCode::GetUpvalue, up.index as u32)
            };
            self.current_chunk_mut().write(word, line);
        }

        self.emit_i(OpCode::ForEach, -2, line);
        self.consume_statement_end()
    }

    fn expression_statement(&mut self) -> CResult<()> {
        let line = self.current.line;
        let baseline = self.current_scope().stack_effect;
        self.expression()?;
        let delta = self.current_scope().stack_effect - baseline;
        if delta > 0 {
            self.emit_iax(OpCode::Pop, delta as u32, -delta, line);
        } else if delta < 0 {
            self.error("expression expected");
        }
        self.consume_statement_end()
    }

    // --- expressions ---

    fn expression(&mut self) -> CResult<()> {
        self.parse_precedence(Prec::Assignment)
    }

    fn parse_precedence(&mut self, min_prec: Prec) -> CResult<()> {
        self.advance()?;
        self.prefix(min_prec)?;
        while min_prec <= infix_precedence(&self.current.kind) {
            self.advance()?;
            self.infix(min_prec)?;
        }
        Ok(())
    }

    fn prefix(&mut self, min_prec: Prec) -> CResult<()> {
        let line = self.previous.line;
        match self.previous.kind.clone() {
            TokenKind::Number(n) => self.emit_constant(Value::Number(n), line),
            TokenKind::Str(s) => {
                let r = self.intern(&s);
                self.emit_constant(Value::Object(r), line);
            }
            TokenKind::Char(c) => self.emit_constant(Value::Character(c), line),
            TokenKind::True => {
                self.emit_i(OpCode::PushTrue, 1, line);
            }
            TokenKind::False => {
                self.emit_i(OpCode::PushFalse, 1, line);
            }
            TokenKind::Nil => {
                self.emit_i(OpCode::PushNil, 1, line);
            }
            TokenKind::Identifier(name) => self.variable(&name, min_prec, line)?,
            TokenKind::LParen => {
                self.expression()?;
                self.consume(&TokenKind::RParen, "expected ')'")?;
            }
            TokenKind::Minus => {
                self.parse_precedence(Prec::Unary)?;
                self.emit_i(OpCode::Negate, 0, line);
            }
            TokenKind::Bang => {
                self.parse_precedence(Prec::Unary)?;
                self.emit_i(OpCode::Not, 0, line);
            }
            TokenKind::Hash => {
                self.parse_precedence(Prec::Unary)?;
                self.emit_i(OpCode::Length, 0, line);
            }
            TokenKind::PlusPlus | TokenKind::MinusMinus => {
                let pre_is_inc = matches!(self.previous.kind, TokenKind::PlusPlus);
                let name = match self.current.kind.clone() {
                    TokenKind::Identifier(n) => {
                        self.advance()?;
                        n
                    }
                    _ => {
                        self.error_at_current("expected variable after '++'/'--'");
                        return Err(());
                    }
                };
                let kind = self.resolve_variable(&name);
                self.compile_incdec(kind, pre_is_inc, true, line);
            }
            TokenKind::LBrace => self.table_literal(line)?,
            TokenKind::Function => {
                self.function_body(None, false, line)?;
            }
            _ => {
                self.error("expression expected");
                return Err(());
            }
        }
        Ok(())
    }

    fn infix(&mut self, min_prec: Prec) -> CResult<()> {
        let line = self.previous.line;
        match self.previous.kind.clone() {
            TokenKind::Plus => {
                self.parse_precedence(Prec::Multiplicative)?;
                self.emit_i(OpCode::Add, -1, line);
            }
            TokenKind::Minus => {
                self.parse_precedence(Prec::Multiplicative)?;
                self.emit_i(OpCode::Sub, -1, line);
            }
            TokenKind::Star => {
                self.parse_precedence(Prec::Unary)?;
                self.emit_i(OpCode::Mul, -1, line);
            }
            TokenKind::Slash => {
                self.parse_precedence(Prec::Unary)?;
                self.emit_i(OpCode::Div, -1, line);
            }
            TokenKind::Percent => {
                self.parse_precedence(Prec::Unary)?;
                self.emit_i(OpCode::Mod, -1, line);
            }
            TokenKind::DotDot => {
                self.parse_precedence(Prec::Additive)?;
                self.emit_iax(OpCode::Concat, 2, -1, line);
            }
            TokenKind::EqEq => {
                self.parse_precedence(Prec::Comparison)?;
                self.emit_i(OpCode::Equal, -1, line);
            }
            TokenKind::NotEq => {
                self.parse_precedence(Prec::Comparison)?;
                self.emit_i(OpCode::Equal, -1, line);
                self.emit_i(OpCode::Not, 0, line);
            }
            TokenKind::Lt => {
                self.parse_precedence(Prec::Concat)?;
                self.emit_i(OpCode::Less, -1, line);
            }
            TokenKind::Gt => {
                self.parse_precedence(Prec::Concat)?;
                self.emit_i(OpCode::Greater, -1, line);
            }
            TokenKind::Le => {
                self.parse_precedence(Prec::Concat)?;
                self.emit_i(OpCode::Greater, -1, line);
                self.emit_i(OpCode::Not, 0, line);
            }
            TokenKind::Ge => {
                self.parse_precedence(Prec::Concat)?;
                self.emit_i(OpCode::Less, -1, line);
                self.emit_i(OpCode::Not, 0, line);
            }
            TokenKind::And => {
                let jump = self.emit_jump_placeholder(OpCode::CndNotJump, 0, line);
                self.emit_iax(OpCode::Pop, 1, -1, line);
                self.parse_precedence(Prec::And)?;
                self.patch_jump_here(jump);
            }
            TokenKind::Or => {
                let jump = self.emit_jump_placeholder(OpCode::CndJump, 0, line);
                self.emit_iax(OpCode::Pop, 1, -1, line);
                self.parse_precedence(Prec::Or)?;
                self.patch_jump_here(jump);
            }
            TokenKind::Dot => {
                let name = match self.current.kind.clone() {
                    TokenKind::Identifier(n) => {
                        self.advance()?;
                        n
                    }
                    _ => {
                        self.error_at_current("expected field name after '.'");
                        return Err(());
                    }
                };
                let r = self.intern(&name);
                self.emit_constant(Value::Object(r), line);
                self.finish_index_or_assign(min_prec, line)?;
            }
            TokenKind::LBracket => {
                self.expression()?;
                self.consume(&TokenKind::RBracket, "expected ']'")?;
                self.finish_index_or_assign(min_prec, line)?;
            }
            TokenKind::LParen => self.finish_call(line)?,
            _ => {}
        }
        Ok(())
    }

    fn finish_index_or_assign(&mut self, min_prec: Prec, line: u32) -> CResult<()> {
        if min_prec <= Prec::Assignment && self.check(&TokenKind::Eq) {
            self.advance()?;
            self.expression()?;
            self.emit_i(OpCode::NewIndex, -2, line);
        } else {
            self.emit_i(OpCode::Index, -1, line);
        }
        Ok(())
    }

    fn finish_call(&mut self, line: u32) -> CResult<()> {
        let mut argc = 0u32;
        if !self.check(&TokenKind::RParen) {
            loop {
                self.expression()?;
                argc += 1;
                if !self.matches(&TokenKind::Comma)? {
                    break;
                }
            }
        }
        self.consume(&TokenKind::RParen, "expected ')' after arguments")?;
        self.emit_iax(OpCode::Call, argc, -(argc as i64), line);
        Ok(())
    }

    fn variable(&mut self, name: &str, min_prec: Prec, line: u32) -> CResult<()> {
        let kind = self.resolve_variable(name);
        if min_prec <= Prec::Assignment && self.check(&TokenKind::Eq) {
            self.advance()?;
            self.expression()?;
            self.emit_set(kind, line);
        } else if matches!(self.current.kind, TokenKind::PlusPlus | TokenKind::MinusMinus) {
            let is_inc = matches!(self.current.kind, TokenKind::PlusPlus);
            self.advance()?;
            self.compile_incdec(kind, is_inc, false, line);
        } else {
            self.emit_get(kind, line);
        }
        Ok(())
    }

    /// Shared lowering for `++x`/`--x` (pre) and `x++`/`x--` (post): fetch,
    /// run Inc/Dec (which leaves [result, new_value] with `result` chosen
    /// by the pre/post flag), store `new_value` back, drop the duplicate.
    fn compile_incdec(&mut self, kind: VarKind, is_inc: bool, pre: bool, line: u32) {
        self.emit_get(kind, line);
        let op = if is_inc { OpCode::Inc } else { OpCode::Dec };
        self.emit_iax(op, pre as u32, 1, line);
        self.emit_set(kind, line);
        self.emit_iax(OpCode::Pop, 1, -1, line);
    }

    fn table_literal(&mut self, line: u32) -> CResult<()> {
        let mut count = 0u32;
        let mut next_index = 0f64;
        self.skip_newlines()?;
        while !self.check(&TokenKind::RBrace) {
            let is_named = matches!(self.current.kind, TokenKind::Identifier(_))
                && self.peek_is_colon_after_identifier();
            if is_named {
                let name = match self.current.kind.clone() {
                    TokenKind::Identifier(n) => n,
                    _ => unreachable!(),
                };
                self.advance()?;
                self.consume(&TokenKind::Colon, "expected ':' in table entry")?;
                let r = self.intern(&name);
                self.emit_constant(Value::Object(r), line);
            } else {
                self.emit_constant(Value::Number(next_index), line);
                next_index += 1.0;
            }
            self.expression()?;
            count += 1;
            self.skip_newlines()?;
            if !self.matches(&TokenKind::Comma)? {
                break;
            }
            self.skip_newlines()?;
        }
        self.skip_newlines()?;
        self.consume(&TokenKind::RBrace, "expected '}' to close table literal")?;
        self.emit_iax(OpCode::NewTable, count, 1 - 2 * count as i64, line);
        Ok(())
    }

    /// Lookahead-without-consuming: is the current identifier immediately
    /// followed by ':' (a named table entry) rather than a bare positional
    /// expression that happens to start with an identifier?
    fn peek_is_colon_after_identifier(&mut self) -> bool {
        let mut probe = self.lexer.clone();
        matches!(probe.next_token(), Ok(Token { kind: TokenKind::Colon, .. }))
    }

    fn function_body(&mut self, name: Option<String>, embedded: bool, line: u32) -> CResult<()> {
        self.consume(&TokenKind::LParen, "expected '(' after function name")?;
        self.scopes.push(FuncScope::new(name, embedded));
        let mut arity = 0u8;
        if !self.check(&TokenKind::RParen) {
            loop {
                match self.current.kind.clone() {
                    TokenKind::Identifier(n) => {
                        self.advance()?;
                        self.current_scope_mut().locals.push(Local { name: n, depth: 0 });
                        arity += 1;
                    }
                    _ => {
                        self.error_at_current("expected parameter name");
                        break;
                    }
                }
                if !self.matches(&TokenKind::Comma)? {
                    break;
                }
            }
        }
        self.current_scope_mut().arity = arity;
        self.consume(&TokenKind::RParen, "expected ')' after parameters")?;
        self.skip_newlines()?;
        self.statement_list(&[TokenKind::End])?;
        self.emit_i(OpCode::End, 0, line);
        self.consume(&TokenKind::End, "expected 'end' to close function body")?;

        let scope = self.scopes.pop().expect("function scope was just pushed");
        let upvalues = scope.upvalues;
        let func = GFunction {
            name: scope.name.map(|n| n.into_boxed_str()),
            arity: scope.arity,
            upvalue_count: upvalues.len() as u8,
            chunk: scope.chunk,
            embedded: scope.embedded,
        };
        let func_ref = self.heap.alloc(Obj::Function(func));
        let const_idx = self.current_chunk_mut().add_constant(Value::Object(func_ref));
        self.emit_iax(OpCode::MakeClosure, const_idx, 1, line);
        for up in &upvalues {
            let word = if up.is_local {
                encode_iax(OpCode::GetBase, up.index as u32)
            } else {
                encode_iax(OpCode::GetUpvalue, up.index as u32)
            };
            self.current_chunk_mut().write(word, line);
        }
        Ok(())
    }
}

fn resolve_upvalue(scopes: &mut [FuncScope], idx: usize, name: &str) -> Option<u8> {
    if idx == 0 {
        return None;
    }
    if let Some(slot) = resolve_local_in(&scopes[idx - 1], name) {
        return Some(add_upvalue(&mut scopes[idx], slot, true));
    }
    if let Some(up) = resolve_upvalue(scopes, idx - 1, name) {
        return Some(add_upvalue(&mut scopes[idx], up, false));
    }
    None
}

fn resolve_local_in(scope: &FuncScope, name: &str) -> Option<u8> {
    for (i, local) in scope.locals.iter().enumerate().rev() {
        if local.name == name {
            return Some(i as u8);
        }
    }
    None
}

fn add_upvalue(scope: &mut FuncScope, index: u8, is_local: bool) -> u8 {
    for (i, u) in scope.upvalues.iter().enumerate() {
        if u.index == index && u.is_local == is_local {
            return i as u8;
        }
    }
    scope.upvalues.push(UpvalueDesc { index, is_local });
    (scope.upvalues.len() - 1) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::Heap;
    use crate::vm::Vm;

    fn compiles(src: &str) -> bool {
        let mut heap = Heap::new();
        compile(src, &mut heap).is_ok()
    }

    #[test]
    fn syntax_error_is_reported_with_line() {
        let mut heap = Heap::new();
        let err = compile("var a = 1\nvar b = 2\nvar c = )\n", &mut heap).unwrap_err();
        assert_eq!(err.trace[0].line, 3);
    }

    #[test]
    fn local_cannot_reference_itself_in_initializer() {
        assert!(!compiles("local x = x"));
    }

    #[test]
    fn a_function_nested_in_another_function_is_not_implicitly_global() {
        // `inc` is declared directly inside `make`'s own top-level block
        // (scope_depth 0 *of make*, not of the program) and must stay a
        // local captured as an upvalue, not leak out as a global that a
        // second `make()` call would stomp on.
        let src = "function make() local c = 0 function inc() c = c + 1 return c end return inc end\n\
                   global f1 = make()\n\
                   global f2 = make()\n\
                   global a = f1()\n\
                   global b = f2()\n\
                   global c = f1()";
        let mut vm = Vm::new();
        let func_ref = compile(src, &mut vm.heap).unwrap();
        vm.run_function(func_ref).unwrap();
        // f1 and f2 each close over their own independent `c`; if `inc`
        // had leaked as a shared global, f2() would have clobbered f1's
        // state and the third call would read 2, not 2-then-1 independent
        // counters.
        assert_eq!(vm.get_global("a"), Some(Value::Number(1.0)));
        assert_eq!(vm.get_global("b"), Some(Value::Number(1.0)));
        assert_eq!(vm.get_global("c"), Some(Value::Number(2.0)));
    }

    #[test]
    fn field_assignment_is_gated_by_precedence_like_variable_assignment() {
        // `b.c = d` may only be parsed as an assignment directly, not as
        // the right-hand operand of `and` — mirrors how `b = d` behaves
        // there (`variable`'s min_prec gate).
        assert!(!compiles("global t = { c: 1 }\nglobal b = t\nvar x = true and b.c = 2\n"));
        assert!(compiles("global t = { c: 1 }\nt.c = 2\n"));
    }

    #[test]
    fn nested_local_function_can_recurse_by_name() {
        let src = "function outer()\n\
                   \tfunction countdown(n)\n\
                   \t\tif (n <= 0) return 0 end\n\
                   \t\treturn countdown(n - 1)\n\
                   \tend\n\
                   \treturn countdown(5)\n\
                   end\n\
                   global r = outer()";
        let mut vm = Vm::new();
        let func_ref = compile(src, &mut vm.heap).unwrap();
        vm.run_function(func_ref).unwrap();
        assert_eq!(vm.get_global("r"), Some(Value::Number(0.0)));
    }
}

