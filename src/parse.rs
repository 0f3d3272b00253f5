//! Parser for .ninja files.
//!
//! Parsing mostly produces references into the input text, marked with the
//! lifetime `'text`; the loader decides which pieces to make owned.

use crate::eval::{EvalPart, EvalString};
use crate::scanner::{ParseError, ParseResult, Scanner};
use crate::smallmap::SmallMap;
use std::path::Path;

/// A list of variable bindings, as expressed with syntax like:
///   key = $val
pub type VarList<'text> = SmallMap<&'text str, EvalString<&'text str>>;

pub struct Rule<'text> {
    pub name: &'text str,
    pub vars: VarList<'text>,
}

pub struct Build<'text> {
    pub rule: &'text str,
    pub line: usize,
    pub outs: Vec<EvalString<&'text str>>,
    pub explicit_outs: usize,
    pub ins: Vec<EvalString<&'text str>>,
    pub explicit_ins: usize,
    pub implicit_ins: usize,
    pub order_only_ins: usize,
    pub validation_ins: usize,
    pub vars: VarList<'text>,
}

#[derive(Debug)]
pub struct Pool<'text> {
    pub name: &'text str,
    pub depth: usize,
}

pub enum Statement<'text> {
    Rule(Rule<'text>),
    Build(Build<'text>),
    Default(Vec<EvalString<&'text str>>),
    Include(EvalString<&'text str>),
    Subninja(EvalString<&'text str>),
    Pool(Pool<'text>),
    VarAssignment((&'text str, EvalString<&'text str>)),
}

pub struct Parser<'text> {
    scanner: Scanner<'text>,
}

impl<'text> Parser<'text> {
    pub fn new(buf: &'text [u8]) -> Parser<'text> {
        Parser {
            scanner: Scanner::new(buf),
        }
    }

    pub fn format_parse_error(&self, filename: &Path, err: ParseError) -> String {
        self.scanner.format_parse_error(filename, err)
    }

    /// Read the next statement, or None at end of input.  Variable
    /// assignments are returned to the caller, who owns scoping.
    pub fn read(&mut self) -> ParseResult<Option<Statement<'text>>> {
        loop {
            match self.scanner.peek() {
                '\0' => return Ok(None),
                '\n' | '\r' => self.scanner.next(),
                '#' => self.skip_comment()?,
                ' ' | '\t' => return self.scanner.parse_error("unexpected whitespace"),
                _ => {
                    let ident = self.read_ident()?;
                    self.skip_spaces();
                    return Ok(Some(match ident {
                        "rule" => Statement::Rule(self.read_rule()?),
                        "build" => Statement::Build(self.read_build()?),
                        "default" => Statement::Default(self.read_default()?),
                        "include" => Statement::Include(self.read_eval(false)?),
                        "subninja" => Statement::Subninja(self.read_eval(false)?),
                        "pool" => Statement::Pool(self.read_pool()?),
                        ident => Statement::VarAssignment((ident, self.read_vardef()?)),
                    }));
                }
            }
        }
    }

    /// Read the `= value` part of a variable definition, consuming the
    /// trailing newline.
    fn read_vardef(&mut self) -> ParseResult<EvalString<&'text str>> {
        self.skip_spaces();
        self.scanner.expect('=')?;
        self.skip_spaces();
        // An empty value is allowed here ("empty_var =").
        if self.scanner.peek_newline() {
            self.scanner.skip('\r');
            self.scanner.expect('\n')?;
            return Ok(EvalString::new(Vec::new()));
        }
        let result = self.read_eval(false);
        self.scanner.skip('\r');
        self.scanner.expect('\n')?;
        result
    }

    /// Read a collection of indented `  foo = bar` bindings.
    fn read_scoped_vars(
        &mut self,
        variable_name_validator: fn(var: &str) -> bool,
    ) -> ParseResult<VarList<'text>> {
        let mut vars = VarList::default();
        while self.scanner.peek() == ' ' {
            self.scanner.skip_spaces();
            let name = self.read_ident()?;
            if !variable_name_validator(name) {
                self.scanner
                    .parse_error(format!("unexpected variable {:?}", name))?;
            }
            self.skip_spaces();
            let val = self.read_vardef()?;
            vars.insert(name, val);
        }
        Ok(vars)
    }

    fn read_rule(&mut self) -> ParseResult<Rule<'text>> {
        let name = self.read_ident()?;
        self.scanner.skip('\r');
        self.scanner.expect('\n')?;
        let vars = self.read_scoped_vars(|var| {
            matches!(
                var,
                "command"
                    | "depfile"
                    | "dyndep"
                    | "description"
                    | "deps"
                    | "generator"
                    | "pool"
                    | "restat"
                    | "rspfile"
                    | "rspfile_content"
                    | "msvc_deps_prefix"
            )
        })?;
        Ok(Rule { name, vars })
    }

    fn read_pool(&mut self) -> ParseResult<Pool<'text>> {
        let name = self.read_ident()?;
        self.scanner.skip('\r');
        self.scanner.expect('\n')?;
        let vars = self.read_scoped_vars(|var| matches!(var, "depth"))?;
        let mut depth = 0;
        if let Some(val) = vars.get("depth") {
            let val = val.evaluate(&[]);
            depth = match val.parse::<usize>() {
                Ok(d) => d,
                Err(err) => return self.scanner.parse_error(format!("pool depth: {}", err)),
            };
        }
        Ok(Pool { name, depth })
    }

    fn read_paths_to(&mut self, v: &mut Vec<EvalString<&'text str>>) -> ParseResult<()> {
        self.skip_spaces();
        while self.scanner.peek() != ':'
            && self.scanner.peek() != '|'
            && !self.scanner.peek_newline()
        {
            v.push(self.read_eval(true)?);
            self.skip_spaces();
        }
        Ok(())
    }

    fn read_build(&mut self) -> ParseResult<Build<'text>> {
        let line = self.scanner.line;
        let mut outs = Vec::new();
        self.read_paths_to(&mut outs)?;
        let explicit_outs = outs.len();

        // `|`: implicit outputs.
        if self.scanner.peek() == '|' {
            self.scanner.next();
            self.read_paths_to(&mut outs)?;
        }

        self.scanner.expect(':')?;
        self.skip_spaces();
        let rule = self.read_ident()?;

        let mut ins = Vec::new();
        self.read_paths_to(&mut ins)?;
        let explicit_ins = ins.len();

        // `|`: implicit inputs, unless actually `||` or `|@`.
        if self.scanner.peek() == '|' {
            self.scanner.next();
            let peek = self.scanner.peek();
            if peek == '|' || peek == '@' {
                self.scanner.back();
            } else {
                self.read_paths_to(&mut ins)?;
            }
        }
        let implicit_ins = ins.len() - explicit_ins;

        // `||`: order-only inputs.
        if self.scanner.peek() == '|' {
            self.scanner.next();
            if self.scanner.peek() == '@' {
                self.scanner.back();
            } else {
                self.scanner.expect('|')?;
                self.read_paths_to(&mut ins)?;
            }
        }
        let order_only_ins = ins.len() - implicit_ins - explicit_ins;

        // `|@`: validations.
        if self.scanner.peek() == '|' {
            self.scanner.next();
            self.scanner.expect('@')?;
            self.read_paths_to(&mut ins)?;
        }
        let validation_ins = ins.len() - order_only_ins - implicit_ins - explicit_ins;

        self.scanner.skip('\r');
        self.scanner.expect('\n')?;
        let vars = self.read_scoped_vars(|_| true)?;
        Ok(Build {
            rule,
            line,
            outs,
            explicit_outs,
            ins,
            explicit_ins,
            implicit_ins,
            order_only_ins,
            validation_ins,
            vars,
        })
    }

    fn read_default(&mut self) -> ParseResult<Vec<EvalString<&'text str>>> {
        let mut defaults = Vec::new();
        self.read_paths_to(&mut defaults)?;
        if defaults.is_empty() {
            return self.scanner.parse_error("expected path");
        }
        self.scanner.skip('\r');
        self.scanner.expect('\n')?;
        Ok(defaults)
    }

    fn skip_comment(&mut self) -> ParseResult<()> {
        loop {
            match self.scanner.read() {
                '\0' => {
                    self.scanner.back();
                    return Ok(());
                }
                '\n' => return Ok(()),
                _ => {}
            }
        }
    }

    /// Read an identifier: a rule name, pool name, variable name, etc.
    fn read_ident(&mut self) -> ParseResult<&'text str> {
        let start = self.scanner.ofs;
        while matches!(
            self.scanner.read(),
            'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '-' | '.'
        ) {}
        self.scanner.back();
        let end = self.scanner.ofs;
        if end == start {
            return self.scanner.parse_error("failed to scan ident");
        }
        Ok(self.scanner.slice(start, end))
    }

    /// Read an EvalString.  Stops at a newline, or additionally at
    /// ' ', ':', '|' when scanning a path, without consuming the stopper.
    fn read_eval(&mut self, stop_at_path_separators: bool) -> ParseResult<EvalString<&'text str>> {
        let mut parts = Vec::new();
        let mut ofs = self.scanner.ofs;
        let end = loop {
            match self.scanner.read() {
                '\0' => return self.scanner.parse_error("unexpected EOF"),
                ' ' | ':' | '|' if stop_at_path_separators => {
                    self.scanner.back();
                    break self.scanner.ofs;
                }
                '\n' => {
                    self.scanner.back();
                    break self.scanner.ofs;
                }
                '\r' if self.scanner.peek() == '\n' => {
                    self.scanner.back();
                    break self.scanner.ofs;
                }
                '$' => {
                    let end = self.scanner.ofs - 1;
                    if end > ofs {
                        parts.push(EvalPart::Literal(self.scanner.slice(ofs, end)));
                    }
                    parts.push(self.read_escape()?);
                    ofs = self.scanner.ofs;
                }
                _ => {}
            }
        };
        if end > ofs {
            parts.push(EvalPart::Literal(self.scanner.slice(ofs, end)));
        }
        if parts.is_empty() {
            return self.scanner.parse_error("expected a string");
        }
        Ok(EvalString::new(parts))
    }

    /// Read a variable name as found after a '$' in an eval.  Unlike idents
    /// this disallows '.', so `$foo.d` parses as a reference to `$foo`.
    fn read_simple_varname(&mut self) -> ParseResult<&'text str> {
        let start = self.scanner.ofs;
        while matches!(self.scanner.read(), 'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '-') {}
        self.scanner.back();
        let end = self.scanner.ofs;
        if end == start {
            return self.scanner.parse_error("failed to scan variable name");
        }
        Ok(self.scanner.slice(start, end))
    }

    /// Read and interpret the text following a '$' escape character.
    fn read_escape(&mut self) -> ParseResult<EvalPart<&'text str>> {
        Ok(match self.scanner.read() {
            '\n' | '\r' => {
                // Line continuation; whitespace at the start of the next
                // line is swallowed.
                self.scanner.skip_spaces();
                EvalPart::Literal(self.scanner.slice(0, 0))
            }
            ' ' | '$' | ':' => {
                EvalPart::Literal(self.scanner.slice(self.scanner.ofs - 1, self.scanner.ofs))
            }
            '{' => {
                let start = self.scanner.ofs;
                loop {
                    match self.scanner.read() {
                        '\0' => return self.scanner.parse_error("unexpected EOF"),
                        '}' => break,
                        _ => {}
                    }
                }
                EvalPart::VarRef(self.scanner.slice(start, self.scanner.ofs - 1))
            }
            _ => {
                // '$' followed by a bare variable name.
                self.scanner.back();
                EvalPart::VarRef(self.read_simple_varname()?)
            }
        })
    }

    fn skip_spaces(&mut self) {
        loop {
            match self.scanner.read() {
                ' ' => {}
                '$' => {
                    if self.scanner.peek() != '\n' {
                        self.scanner.back();
                        return;
                    }
                    self.scanner.next();
                }
                _ => {
                    self.scanner.back();
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_case_buffer(test_case: &str) -> Vec<u8> {
        let mut buf = test_case.as_bytes().to_vec();
        buf.push(0);
        buf
    }

    fn must_read<'a>(parser: &mut Parser<'a>) -> Statement<'a> {
        parser.read().unwrap().expect("expected statement")
    }

    #[test]
    fn parse_build_regions() {
        let buf = test_case_buffer(
            "build out | out.imp: cc in1 in2 | dep.h || oo.stamp |@ check\n  myvar = 3\n",
        );
        let mut parser = Parser::new(&buf);
        let build = match must_read(&mut parser) {
            Statement::Build(b) => b,
            _ => panic!("expected build"),
        };
        assert_eq!(build.rule, "cc");
        assert_eq!(build.outs.len(), 2);
        assert_eq!(build.explicit_outs, 1);
        assert_eq!(build.explicit_ins, 2);
        assert_eq!(build.implicit_ins, 1);
        assert_eq!(build.order_only_ins, 1);
        assert_eq!(build.validation_ins, 1);
        assert!(build.vars.get("myvar").is_some());
    }

    #[test]
    fn parse_defaults() {
        let buf = test_case_buffer("default a b$var c\n");
        let mut parser = Parser::new(&buf);
        let default = match must_read(&mut parser) {
            Statement::Default(d) => d,
            _ => panic!("expected default"),
        };
        assert_eq!(
            default,
            vec![
                EvalString::new(vec![EvalPart::Literal("a")]),
                EvalString::new(vec![EvalPart::Literal("b"), EvalPart::VarRef("var")]),
                EvalString::new(vec![EvalPart::Literal("c")]),
            ]
        );
    }

    #[test]
    fn parse_dot_in_eval() {
        let buf = test_case_buffer("x = $y.z\n");
        let mut parser = Parser::new(&buf);
        let (name, val) = match must_read(&mut parser) {
            Statement::VarAssignment(v) => v,
            _ => panic!("expected variable"),
        };
        assert_eq!(name, "x");
        assert_eq!(
            val,
            EvalString::new(vec![EvalPart::VarRef("y"), EvalPart::Literal(".z")])
        );
    }

    #[test]
    fn parse_dot_in_rule_name() {
        let buf = test_case_buffer("rule x.y\n  command = x\n");
        let mut parser = Parser::new(&buf);
        assert!(matches!(
            must_read(&mut parser),
            Statement::Rule(Rule { name: "x.y", .. })
        ));
    }

    #[test]
    fn parse_line_continuations() {
        let buf = test_case_buffer("build$\n foo$\n : $\n  touch $\n\n");
        let mut parser = Parser::new(&buf);
        assert!(matches!(
            must_read(&mut parser),
            Statement::Build(Build { rule: "touch", .. })
        ));
    }

    #[test]
    fn parse_pool() {
        let buf = test_case_buffer("pool link\n  depth = 4\n");
        let mut parser = Parser::new(&buf);
        let pool = match must_read(&mut parser) {
            Statement::Pool(p) => p,
            _ => panic!("expected pool"),
        };
        assert_eq!(pool.name, "link");
        assert_eq!(pool.depth, 4);
    }

    #[test]
    fn parse_crlf() {
        let buf = test_case_buffer("rule cat\r\n  command = cat $in > $out\r\n");
        let mut parser = Parser::new(&buf);
        assert!(matches!(
            must_read(&mut parser),
            Statement::Rule(Rule { name: "cat", .. })
        ));
    }

    #[test]
    fn parse_bad_indent() {
        let buf = test_case_buffer(" foo = bar\n");
        let mut parser = Parser::new(&buf);
        assert!(parser.read().is_err());
    }
}
