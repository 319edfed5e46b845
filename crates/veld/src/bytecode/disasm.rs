//! Bytecode disassembly for diagnostics and tests.

use std::fmt::Write;

use super::op::Opcode;

/// Renders an instruction stream as one line per instruction:
///
/// ```text
/// 000000  LoadParam 0
/// 000005  LoadInt 3
/// 000014  Call 1
/// ```
///
/// Undecodable bytes terminate the listing with a `!!` marker so truncated
/// or corrupt streams are still inspectable.
#[must_use]
pub fn disassemble(code: &[u8]) -> String {
    let mut out = String::new();
    let mut pc = 0;
    while pc < code.len() {
        let at = pc;
        let byte = code[pc];
        pc += 1;
        let Some(op) = Opcode::decode(byte) else {
            let _ = writeln!(out, "{at:06}  !! invalid opcode byte {byte:#04x}");
            break;
        };
        let _ = write!(out, "{at:06}  {op}");
        match render_operands(op, code, &mut pc, &mut out) {
            Ok(()) => {
                out.push('\n');
            }
            Err(()) => {
                let _ = writeln!(out, " !! truncated operand");
                break;
            }
        }
    }
    out
}

fn render_operands(op: Opcode, code: &[u8], pc: &mut usize, out: &mut String) -> Result<(), ()> {
    match op {
        Opcode::LoadInt => {
            let value = i64::from_be_bytes(fetch(code, pc)?);
            let _ = write!(out, " {value}");
        }
        Opcode::LoadFloat => {
            let value = f64::from_bits(u64::from_be_bytes(fetch(code, pc)?));
            let _ = write!(out, " {value}");
        }
        Opcode::LoadContext | Opcode::StoreContext => {
            let level = u32::from_be_bytes(fetch(code, pc)?);
            let index = u32::from_be_bytes(fetch(code, pc)?);
            let _ = write!(out, " {level} {index}");
        }
        Opcode::LoadModule
        | Opcode::StoreModule
        | Opcode::LoadParam
        | Opcode::StoreParam
        | Opcode::LoadLocal
        | Opcode::StoreLocal
        | Opcode::LoadMember
        | Opcode::StoreMember
        | Opcode::LoadTupleMember
        | Opcode::StoreTupleMember
        | Opcode::MkArray
        | Opcode::MkTuple
        | Opcode::MkMap
        | Opcode::MkSet
        | Opcode::MkRecord
        | Opcode::MkContext
        | Opcode::Jmp
        | Opcode::JmpTrue
        | Opcode::JmpTruePop
        | Opcode::JmpFalse
        | Opcode::JmpFalsePop
        | Opcode::JmpNull
        | Opcode::JmpNotNull
        | Opcode::Call
        | Opcode::LoadMethod
        | Opcode::CallMethod => {
            let value = u32::from_be_bytes(fetch(code, pc)?);
            let _ = write!(out, " {value}");
        }
        _ => {}
    }
    Ok(())
}

fn fetch<const N: usize>(code: &[u8], pc: &mut usize) -> Result<[u8; N], ()> {
    let end = *pc + N;
    let slice = code.get(*pc..end).ok_or(())?;
    *pc = end;
    Ok(slice.try_into().expect("length checked"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::FunctionBuilder;

    #[test]
    fn listing_shows_opcodes_and_operands() {
        let mut f = FunctionBuilder::new();
        f.emit_u32(Opcode::LoadParam, 0);
        f.emit_i64(Opcode::LoadInt, -7);
        f.emit(Opcode::Add);
        f.emit(Opcode::Ret);
        let listing = disassemble(&f.finish());

        let lines: Vec<&str> = listing.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].contains("LoadParam 0"));
        assert!(lines[1].contains("LoadInt -7"));
        assert!(lines[2].contains("Add"));
        assert!(lines[3].contains("Ret"));
    }

    #[test]
    fn invalid_bytes_are_flagged() {
        let listing = disassemble(&[0xFF]);
        assert!(listing.contains("invalid opcode byte"));
    }

    #[test]
    fn truncated_operands_are_flagged() {
        let listing = disassemble(&[Opcode::LoadLocal as u8, 0x00]);
        assert!(listing.contains("truncated operand"));
    }
}
