// File: src/parser.rs
//
// Recursive-descent parser with Pratt-style operator precedence for
// expressions. Produces the trees `crate::ast` defines; the code generator
// never sees tokens.

use crate::ast::*;
use crate::errors::{ArdanError, ErrorKind};
use crate::lexer::{Token, TokenKind};

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

type PResult<T> = Result<T, ArdanError>;

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Parser { tokens, pos: 0 }
    }

    fn current(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn kind(&self) -> &TokenKind {
        &self.current().kind
    }

    fn at_eof(&self) -> bool {
        matches!(self.kind(), TokenKind::Eof)
    }

    fn advance(&mut self) -> Token {
        let tok = self.current().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn check_punct(&self, p: &str) -> bool {
        self.current().is_punct(p)
    }

    fn check_keyword(&self, k: &str) -> bool {
        self.current().is_keyword(k)
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.check_punct(p) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, k: &str) -> bool {
        if self.check_keyword(k) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &str) -> PResult<()> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            Err(self.unexpected(format!("expected `{p}`")))
        }
    }

    fn expect_keyword(&mut self, k: &str) -> PResult<()> {
        if self.eat_keyword(k) {
            Ok(())
        } else {
            Err(self.unexpected(format!("expected `{k}`")))
        }
    }

    fn expect_identifier(&mut self) -> PResult<String> {
        match self.kind().clone() {
            TokenKind::Identifier(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected("expected an identifier")),
        }
    }

    fn unexpected(&self, message: impl Into<String>) -> ArdanError {
        let loc = self.current().location();
        ArdanError::new(ErrorKind::ParseError, message.into()).with_location(loc)
    }

    fn semicolon(&mut self) {
        // ASI-lite: a `;` is consumed if present, never required.
        self.eat_punct(";");
    }

    pub fn parse_program(&mut self) -> PResult<Program> {
        let mut stmts = Vec::new();
        while !self.at_eof() {
            stmts.push(self.parse_stmt()?);
        }
        Ok(stmts)
    }

    // --- statements -----------------------------------------------------

    fn parse_stmt(&mut self) -> PResult<Stmt> {
        if self.check_keyword("var") || self.check_keyword("let") || self.check_keyword("const") {
            let stmt = self.parse_var_decl()?;
            self.semicolon();
            return Ok(stmt);
        }
        if self.check_keyword("function") {
            return self.parse_function_decl();
        }
        if self.check_keyword("class") {
            return self.parse_class_decl();
        }
        if self.check_punct("{") {
            return self.parse_block();
        }
        if self.check_keyword("if") {
            return self.parse_if();
        }
        if self.check_keyword("while") {
            return self.parse_while();
        }
        if self.check_keyword("for") {
            return self.parse_for();
        }
        if self.eat_keyword("return") {
            let expr = if self.check_punct(";") || self.check_punct("}") || self.at_eof() {
                None
            } else {
                Some(self.parse_expr()?)
            };
            self.semicolon();
            return Ok(Stmt::Return(expr));
        }
        if self.eat_keyword("break") {
            self.semicolon();
            return Ok(Stmt::Break);
        }
        if self.eat_keyword("continue") {
            self.semicolon();
            return Ok(Stmt::Continue);
        }
        if self.eat_keyword("throw") {
            let expr = self.parse_expr()?;
            self.semicolon();
            return Ok(Stmt::Throw(expr));
        }
        if self.check_keyword("try") {
            return self.parse_try();
        }
        if self.check_keyword("import") {
            return self.parse_import();
        }
        let expr = self.parse_expr()?;
        self.semicolon();
        Ok(Stmt::Expr(expr))
    }

    fn parse_decl_kind(&mut self) -> PResult<DeclKind> {
        if self.eat_keyword("var") {
            Ok(DeclKind::Var)
        } else if self.eat_keyword("let") {
            Ok(DeclKind::Let)
        } else if self.eat_keyword("const") {
            Ok(DeclKind::Const)
        } else {
            Err(self.unexpected("expected `var`, `let`, or `const`"))
        }
    }

    fn parse_var_decl(&mut self) -> PResult<Stmt> {
        let kind = self.parse_decl_kind()?;
        let name = self.expect_identifier()?;
        let init = if self.eat_punct("=") { Some(self.parse_expr()?) } else { None };
        Ok(Stmt::VarDecl { kind, name, init })
    }

    fn parse_block(&mut self) -> PResult<Stmt> {
        self.expect_punct("{")?;
        let mut stmts = Vec::new();
        while !self.check_punct("}") && !self.at_eof() {
            stmts.push(self.parse_stmt()?);
        }
        self.expect_punct("}")?;
        Ok(Stmt::Block(stmts))
    }

    fn parse_block_stmts(&mut self) -> PResult<Vec<Stmt>> {
        self.expect_punct("{")?;
        let mut stmts = Vec::new();
        while !self.check_punct("}") && !self.at_eof() {
            stmts.push(self.parse_stmt()?);
        }
        self.expect_punct("}")?;
        Ok(stmts)
    }

    fn parse_if(&mut self) -> PResult<Stmt> {
        self.expect_keyword("if")?;
        self.expect_punct("(")?;
        let test = self.parse_expr()?;
        self.expect_punct(")")?;
        let consequent = Box::new(self.parse_stmt()?);
        let alternate = if self.eat_keyword("else") { Some(Box::new(self.parse_stmt()?)) } else { None };
        Ok(Stmt::If { test, consequent, alternate })
    }

    fn parse_while(&mut self) -> PResult<Stmt> {
        self.expect_keyword("while")?;
        self.expect_punct("(")?;
        let test = self.parse_expr()?;
        self.expect_punct(")")?;
        let body = Box::new(self.parse_stmt()?);
        Ok(Stmt::While { test, body })
    }

    fn parse_for(&mut self) -> PResult<Stmt> {
        self.expect_keyword("for")?;
        self.expect_punct("(")?;

        if (self.check_keyword("var") || self.check_keyword("let") || self.check_keyword("const"))
            && self.peeks_decl_then_in_or_of()
        {
            let kind = self.parse_decl_kind()?;
            let name = self.expect_identifier()?;
            if self.eat_keyword("in") {
                let object = self.parse_expr()?;
                self.expect_punct(")")?;
                let body = Box::new(self.parse_stmt()?);
                return Ok(Stmt::ForIn { decl_kind: kind, name, object, body });
            }
            self.expect_keyword("of")?;
            let iterable = self.parse_expr()?;
            self.expect_punct(")")?;
            let body = Box::new(self.parse_stmt()?);
            return Ok(Stmt::ForOf { decl_kind: kind, name, iterable, body });
        }

        let init = if self.check_punct(";") {
            ForInit::None
        } else if self.check_keyword("var") || self.check_keyword("let") || self.check_keyword("const") {
            let kind = self.parse_decl_kind()?;
            let name = self.expect_identifier()?;
            let init = if self.eat_punct("=") { Some(self.parse_expr()?) } else { None };
            ForInit::Decl { kind, name, init }
        } else {
            ForInit::Expr(self.parse_expr()?)
        };
        self.expect_punct(";")?;
        let test = if self.check_punct(";") { None } else { Some(self.parse_expr()?) };
        self.expect_punct(";")?;
        let update = if self.check_punct(")") { None } else { Some(self.parse_expr()?) };
        self.expect_punct(")")?;
        let body = Box::new(self.parse_stmt()?);
        Ok(Stmt::For { init, test, update, body })
    }

    /// Lookahead: `for (let <ident> in|of ...)` vs. a regular C-style head.
    fn peeks_decl_then_in_or_of(&self) -> bool {
        let mut i = self.pos + 1; // past var/let/const
        if i >= self.tokens.len() || !matches!(self.tokens[i].kind, TokenKind::Identifier(_)) {
            return false;
        }
        i += 1;
        matches!(&self.tokens.get(i).map(|t| &t.kind), Some(TokenKind::Keyword(k)) if k == "in" || k == "of")
    }

    fn parse_try(&mut self) -> PResult<Stmt> {
        self.expect_keyword("try")?;
        let block = self.parse_block_stmts()?;
        let mut catch_param = None;
        let mut catch_block = None;
        if self.eat_keyword("catch") {
            if self.eat_punct("(") {
                catch_param = Some(self.expect_identifier()?);
                self.expect_punct(")")?;
            }
            catch_block = Some(self.parse_block_stmts()?);
        }
        let finally_block = if self.eat_keyword("finally") { Some(self.parse_block_stmts()?) } else { None };
        Ok(Stmt::Try { block, catch_param, catch_block, finally_block })
    }

    fn parse_import(&mut self) -> PResult<Stmt> {
        self.expect_keyword("import")?;
        let binding = if matches!(self.kind(), TokenKind::Identifier(_)) { Some(self.expect_identifier()?) } else { None };
        if binding.is_some() {
            self.expect_keyword("from")?;
        }
        let path = match self.kind().clone() {
            TokenKind::String(s) => {
                self.advance();
                s
            }
            _ => return Err(self.unexpected("expected a module path string")),
        };
        self.semicolon();
        Ok(Stmt::Import { path, binding })
    }

    fn parse_function_decl(&mut self) -> PResult<Stmt> {
        self.expect_keyword("function")?;
        let name = self.expect_identifier()?;
        let params = self.parse_params()?;
        let body = self.parse_block_stmts()?;
        Ok(Stmt::FunctionDecl { name, params, body })
    }

    fn parse_params(&mut self) -> PResult<Vec<Param>> {
        self.expect_punct("(")?;
        let mut params = Vec::new();
        while !self.check_punct(")") {
            let is_rest = self.eat_punct("...");
            let name = self.expect_identifier()?;
            let default = if !is_rest && self.eat_punct("=") { Some(self.parse_assignment()?) } else { None };
            params.push(Param { name, default, is_rest });
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct(")")?;
        Ok(params)
    }

    fn parse_class_decl(&mut self) -> PResult<Stmt> {
        self.expect_keyword("class")?;
        let name = self.expect_identifier()?;
        let superclass = if self.eat_keyword("extends") { Some(self.parse_unary()?) } else { None };
        self.expect_punct("{")?;
        let mut fields = Vec::new();
        let mut methods = Vec::new();
        while !self.check_punct("}") && !self.at_eof() {
            let visibility = self.parse_visibility();
            let is_static = self.eat_keyword("static");

            if self.check_keyword("var") || self.check_keyword("const") {
                let kind = self.parse_decl_kind()?;
                let name = self.expect_identifier()?;
                let init = if self.eat_punct("=") { Some(self.parse_expr()?) } else { None };
                self.semicolon();
                fields.push(FieldDecl { name, kind, visibility, is_static, init });
                continue;
            }

            let method_name = self.expect_identifier()?;
            let params = self.parse_params()?;
            let body = self.parse_block_stmts()?;
            methods.push(MethodDecl { name: method_name, visibility, is_static, params, body });
        }
        self.expect_punct("}")?;
        Ok(Stmt::ClassDecl { name, superclass, fields, methods })
    }

    fn parse_visibility(&mut self) -> Visibility {
        if self.eat_keyword("private") {
            Visibility::Private
        } else if self.eat_keyword("protected") {
            Visibility::Protected
        } else {
            self.eat_keyword("public");
            Visibility::Public
        }
    }

    // --- expressions ------------------------------------------------------
    //
    // Pratt parser: `parse_expr` handles the comma-free top level (assignment
    // is the lowest-precedence binary-like form), everything else climbs
    // through `parse_binary` by a static precedence table.

    fn parse_expr(&mut self) -> PResult<Expr> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> PResult<Expr> {
        let target = self.parse_conditional()?;
        let op = match self.kind() {
            TokenKind::Punct(p) if p == "=" => Some(AssignOp::Assign),
            TokenKind::Punct(p) if p == "+=" => Some(AssignOp::AddAssign),
            TokenKind::Punct(p) if p == "-=" => Some(AssignOp::SubAssign),
            TokenKind::Punct(p) if p == "*=" => Some(AssignOp::MulAssign),
            TokenKind::Punct(p) if p == "/=" => Some(AssignOp::DivAssign),
            TokenKind::Punct(p) if p == "%=" => Some(AssignOp::ModAssign),
            _ => None,
        };
        let Some(op) = op else { return Ok(target) };
        self.advance();
        let value = self.parse_assignment()?;
        Ok(Expr::Assign { op, target: Box::new(target), value: Box::new(value) })
    }

    fn parse_conditional(&mut self) -> PResult<Expr> {
        let test = self.parse_nullish()?;
        if self.eat_punct("?") {
            let consequent = self.parse_assignment()?;
            self.expect_punct(":")?;
            let alternate = self.parse_assignment()?;
            return Ok(Expr::Conditional { test: Box::new(test), consequent: Box::new(consequent), alternate: Box::new(alternate) });
        }
        Ok(test)
    }

    fn parse_nullish(&mut self) -> PResult<Expr> {
        let mut left = self.parse_or()?;
        while self.eat_punct("??") {
            let right = self.parse_or()?;
            left = Expr::Logical { op: LogicalOp::NullishCoalescing, left: Box::new(left), right: Box::new(right) };
        }
        Ok(left)
    }

    fn parse_or(&mut self) -> PResult<Expr> {
        let mut left = self.parse_and()?;
        while self.eat_punct("||") {
            let right = self.parse_and()?;
            left = Expr::Logical { op: LogicalOp::Or, left: Box::new(left), right: Box::new(right) };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> PResult<Expr> {
        let mut left = self.parse_bit_or()?;
        while self.eat_punct("&&") {
            let right = self.parse_bit_or()?;
            left = Expr::Logical { op: LogicalOp::And, left: Box::new(left), right: Box::new(right) };
        }
        Ok(left)
    }

    fn parse_bit_or(&mut self) -> PResult<Expr> {
        self.parse_left_assoc(&[("|", BinOp::BitOr)], Self::parse_bit_xor)
    }

    fn parse_bit_xor(&mut self) -> PResult<Expr> {
        self.parse_left_assoc(&[("^", BinOp::BitXor)], Self::parse_bit_and)
    }

    fn parse_bit_and(&mut self) -> PResult<Expr> {
        self.parse_left_assoc(&[("&", BinOp::BitAnd)], Self::parse_equality)
    }

    fn parse_equality(&mut self) -> PResult<Expr> {
        self.parse_left_assoc(
            &[("===", BinOp::StrictEqual), ("!==", BinOp::StrictNotEqual), ("==", BinOp::Equal), ("!=", BinOp::NotEqual)],
            Self::parse_relational,
        )
    }

    fn parse_relational(&mut self) -> PResult<Expr> {
        let mut left = self.parse_shift()?;
        loop {
            let op = if self.check_punct("<=") {
                BinOp::LessEqual
            } else if self.check_punct(">=") {
                BinOp::GreaterEqual
            } else if self.check_punct("<") {
                BinOp::Less
            } else if self.check_punct(">") {
                BinOp::Greater
            } else if self.check_keyword("in") {
                BinOp::In
            } else {
                break;
            };
            self.advance();
            let right = self.parse_shift()?;
            left = Expr::Binary { op, left: Box::new(left), right: Box::new(right) };
        }
        Ok(left)
    }

    fn parse_shift(&mut self) -> PResult<Expr> {
        self.parse_left_assoc(&[(">>>", BinOp::UShr), ("<<", BinOp::Shl), (">>", BinOp::Shr)], Self::parse_additive)
    }

    fn parse_additive(&mut self) -> PResult<Expr> {
        self.parse_left_assoc(&[("+", BinOp::Add), ("-", BinOp::Sub)], Self::parse_multiplicative)
    }

    fn parse_multiplicative(&mut self) -> PResult<Expr> {
        self.parse_left_assoc(&[("*", BinOp::Mul), ("/", BinOp::Div), ("%", BinOp::Mod)], Self::parse_power)
    }

    fn parse_power(&mut self) -> PResult<Expr> {
        let base = self.parse_unary()?;
        if self.eat_punct("**") {
            let exp = self.parse_power()?; // right-associative
            return Ok(Expr::Binary { op: BinOp::Pow, left: Box::new(base), right: Box::new(exp) });
        }
        Ok(base)
    }

    fn parse_left_assoc(&mut self, ops: &[(&str, BinOp)], mut next: impl FnMut(&mut Self) -> PResult<Expr>) -> PResult<Expr> {
        let mut left = next(self)?;
        'outer: loop {
            for (symbol, op) in ops {
                if self.check_punct(symbol) {
                    self.advance();
                    let right = next(self)?;
                    left = Expr::Binary { op: *op, left: Box::new(left), right: Box::new(right) };
                    continue 'outer;
                }
            }
            break;
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        if self.eat_punct("!") {
            return Ok(Expr::Unary { op: UnaryOp::Not, expr: Box::new(self.parse_unary()?) });
        }
        if self.eat_punct("-") {
            return Ok(Expr::Unary { op: UnaryOp::Negate, expr: Box::new(self.parse_unary()?) });
        }
        if self.eat_punct("+") {
            return Ok(Expr::Unary { op: UnaryOp::Positive, expr: Box::new(self.parse_unary()?) });
        }
        if self.eat_keyword("typeof") {
            return Ok(Expr::Unary { op: UnaryOp::TypeOf, expr: Box::new(self.parse_unary()?) });
        }
        if self.eat_keyword("void") {
            return Ok(Expr::Unary { op: UnaryOp::Void, expr: Box::new(self.parse_unary()?) });
        }
        if self.eat_keyword("delete") {
            return Ok(Expr::Unary { op: UnaryOp::Delete, expr: Box::new(self.parse_unary()?) });
        }
        if self.eat_keyword("await") {
            return Ok(Expr::Await(Box::new(self.parse_unary()?)));
        }
        if self.eat_punct("++") {
            return Ok(Expr::Update { op: UpdateOp::Increment, target: Box::new(self.parse_unary()?), prefix: true });
        }
        if self.eat_punct("--") {
            return Ok(Expr::Update { op: UpdateOp::Decrement, target: Box::new(self.parse_unary()?), prefix: true });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_call_or_member()?;
        if self.eat_punct("++") {
            expr = Expr::Update { op: UpdateOp::Increment, target: Box::new(expr), prefix: false };
        } else if self.eat_punct("--") {
            expr = Expr::Update { op: UpdateOp::Decrement, target: Box::new(expr), prefix: false };
        }
        Ok(expr)
    }

    fn parse_call_or_member(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_new()?;
        loop {
            if self.eat_punct(".") {
                let name = self.expect_identifier()?;
                expr = Expr::Member { object: Box::new(expr), property: Box::new(Expr::Identifier(name)), computed: false };
            } else if self.eat_punct("[") {
                let index = self.parse_expr()?;
                self.expect_punct("]")?;
                expr = Expr::Member { object: Box::new(expr), property: Box::new(index), computed: true };
            } else if self.check_punct("(") {
                let args = self.parse_args()?;
                expr = Expr::Call { callee: Box::new(expr), args };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_new(&mut self) -> PResult<Expr> {
        if self.eat_keyword("new") {
            let class_expr = self.parse_new_callee()?;
            let args = if self.check_punct("(") { self.parse_args()? } else { Vec::new() };
            return Ok(Expr::New { class_expr: Box::new(class_expr), args });
        }
        self.parse_primary()
    }

    /// The callee of `new` binds tighter than a call, so `new a.b.C(...)`
    /// resolves `a.b.C` before seeing the argument list.
    fn parse_new_callee(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_primary()?;
        while self.eat_punct(".") {
            let name = self.expect_identifier()?;
            expr = Expr::Member { object: Box::new(expr), property: Box::new(Expr::Identifier(name)), computed: false };
        }
        Ok(expr)
    }

    fn parse_args(&mut self) -> PResult<Vec<Expr>> {
        self.expect_punct("(")?;
        let mut args = Vec::new();
        while !self.check_punct(")") {
            args.push(self.parse_assignment()?);
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct(")")?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        match self.kind().clone() {
            TokenKind::Number(n) => {
                self.advance();
                Ok(Expr::Number(n))
            }
            TokenKind::String(s) => {
                self.advance();
                Ok(Expr::String(s))
            }
            TokenKind::Identifier(name) => {
                self.advance();
                Ok(Expr::Identifier(name))
            }
            TokenKind::Keyword(k) if k == "true" => {
                self.advance();
                Ok(Expr::Bool(true))
            }
            TokenKind::Keyword(k) if k == "false" => {
                self.advance();
                Ok(Expr::Bool(false))
            }
            TokenKind::Keyword(k) if k == "null" => {
                self.advance();
                Ok(Expr::Null)
            }
            TokenKind::Keyword(k) if k == "undefined" => {
                self.advance();
                Ok(Expr::Undefined)
            }
            TokenKind::Keyword(k) if k == "this" => {
                self.advance();
                Ok(Expr::This)
            }
            TokenKind::Keyword(k) if k == "super" => {
                self.advance();
                Ok(Expr::Super)
            }
            TokenKind::Keyword(k) if k == "function" => {
                self.advance();
                let name = if matches!(self.kind(), TokenKind::Identifier(_)) { Some(self.expect_identifier()?) } else { None };
                let params = self.parse_params()?;
                let body = self.parse_block_stmts()?;
                Ok(Expr::Function { name, params, body })
            }
            TokenKind::Keyword(k) if k == "async" => {
                // async functions run exactly like regular functions here;
                // `await` is legal in any function body (see ast::Expr::Await).
                self.advance();
                self.parse_primary()
            }
            TokenKind::Punct(p) if p == "(" => {
                self.advance();
                let expr = self.parse_expr()?;
                self.expect_punct(")")?;
                Ok(expr)
            }
            TokenKind::Punct(p) if p == "[" => self.parse_array_literal(),
            TokenKind::Punct(p) if p == "{" => self.parse_object_literal(),
            _ => Err(self.unexpected("expected an expression")),
        }
    }

    fn parse_array_literal(&mut self) -> PResult<Expr> {
        self.expect_punct("[")?;
        let mut items = Vec::new();
        while !self.check_punct("]") {
            items.push(self.parse_assignment()?);
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct("]")?;
        Ok(Expr::Array(items))
    }

    fn parse_object_literal(&mut self) -> PResult<Expr> {
        self.expect_punct("{")?;
        let mut props = Vec::new();
        while !self.check_punct("}") {
            let key = match self.kind().clone() {
                TokenKind::Identifier(name) => {
                    self.advance();
                    name
                }
                TokenKind::String(s) => {
                    self.advance();
                    s
                }
                _ => return Err(self.unexpected("expected a property key")),
            };
            let value = if self.eat_punct(":") {
                self.parse_assignment()?
            } else {
                Expr::Identifier(key.clone())
            };
            props.push(ObjectProp { key, value });
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct("}")?;
        Ok(Expr::Object(props))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn parse(src: &str) -> Program {
        let tokens = tokenize(src).unwrap();
        Parser::new(tokens).parse_program().unwrap()
    }

    #[test]
    fn parses_a_let_declaration_with_initializer() {
        let program = parse("let x = 1 + 2;");
        assert!(matches!(&program[0], Stmt::VarDecl { kind: DeclKind::Let, name, init: Some(_) } if name == "x"));
    }

    #[test]
    fn parses_function_declaration_with_defaults_and_rest() {
        let program = parse("function f(a, b = 2, ...rest) { return a; }");
        match &program[0] {
            Stmt::FunctionDecl { params, .. } => {
                assert_eq!(params.len(), 3);
                assert!(params[1].default.is_some());
                assert!(params[2].is_rest);
            }
            _ => panic!("expected a function declaration"),
        }
    }

    #[test]
    fn parses_for_of_loop() {
        let program = parse("for (let v of arr) { sum = sum + v; }");
        assert!(matches!(&program[0], Stmt::ForOf { name, .. } if name == "v"));
    }

    #[test]
    fn parses_class_with_visibility_and_static_members() {
        let program = parse("class Foo { private var x = 1; static bar() { return 1; } }");
        match &program[0] {
            Stmt::ClassDecl { fields, methods, .. } => {
                assert_eq!(fields[0].visibility, Visibility::Private);
                assert!(methods[0].is_static);
            }
            _ => panic!("expected a class declaration"),
        }
    }

    #[test]
    fn respects_operator_precedence() {
        let program = parse("let x = 1 + 2 * 3;");
        match &program[0] {
            Stmt::VarDecl { init: Some(Expr::Binary { op: BinOp::Add, right, .. }), .. } => {
                assert!(matches!(**right, Expr::Binary { op: BinOp::Mul, .. }));
            }
            _ => panic!("expected `+` at the top with `*` nested on the right"),
        }
    }
}
