//! Opcode definitions for the script VM.
//!
//! The [`for_each_opcode!`](crate::for_each_opcode) macro holds the canonical
//! opcode table and invokes a callback macro for code generation, so multiple
//! modules can generate opcode-related code without duplicating the table.
//!
//! This module generates:
//! - The [`OpCode`] enum with byte value mappings
//! - `TryFrom<u8>` for decoding opcodes
//! - Mnemonic and operand-shape lookups
//!
//! # Operand encoding
//!
//! Instructions are a single opcode byte optionally followed by an inline
//! operand whose shape is fixed per opcode:
//! - `ImmN`: N-byte little-endian signed integer constant
//! - `DataN`: N-byte little-endian unsigned length followed by that many bytes
//! - `OffN`: N-byte little-endian signed jump offset, relative to the
//!   instruction's first byte
//! - `Hash20`: fixed 20-byte script hash
//! - `Sys4`: fixed 32-bit syscall id (hash of the interop name)
//! - `Type1`: single stack item type byte

use crate::vm::errors::VmError;

/// Shape of the inline operand following an opcode byte.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OperandKind {
    /// No operand.
    None,
    /// Fixed-width little-endian signed integer of the given byte count.
    Imm(usize),
    /// Unsigned length of the given byte count, then that many data bytes.
    Data(usize),
    /// Little-endian signed jump offset of the given byte count.
    Off(usize),
    /// 20-byte script hash.
    Hash20,
    /// 32-bit syscall id.
    Sys4,
    /// Stack item type byte.
    Type1,
}

/// Invokes a callback macro with the complete opcode table.
#[macro_export]
macro_rules! for_each_opcode {
    ($callback:ident) => {
        $callback! {
            // =========================
            // Constants
            // =========================
            /// Push the integer 0.
            Push0 = 0x00, "PUSH0", None,
            /// Push a 1-byte signed integer.
            PushInt8 = 0x01, "PUSHINT8", Imm(1),
            /// Push a 2-byte signed integer.
            PushInt16 = 0x02, "PUSHINT16", Imm(2),
            /// Push a 4-byte signed integer.
            PushInt32 = 0x03, "PUSHINT32", Imm(4),
            /// Push an 8-byte signed integer.
            PushInt64 = 0x04, "PUSHINT64", Imm(8),
            /// Push a 16-byte signed integer.
            PushInt128 = 0x05, "PUSHINT128", Imm(16),
            /// Push a 32-byte signed integer.
            PushInt256 = 0x06, "PUSHINT256", Imm(32),
            /// Push the null item.
            PushNull = 0x0b, "PUSHNULL", None,
            /// Push bytes with a 1-byte length prefix.
            PushData1 = 0x4c, "PUSHDATA1", Data(1),
            /// Push bytes with a 2-byte length prefix.
            PushData2 = 0x4d, "PUSHDATA2", Data(2),
            /// Push bytes with a 4-byte length prefix.
            PushData4 = 0x4e, "PUSHDATA4", Data(4),
            /// Push the integer -1.
            PushM1 = 0x4f, "PUSHM1", None,
            /// Push the integer 1.
            Push1 = 0x51, "PUSH1", None,
            Push2 = 0x52, "PUSH2", None,
            Push3 = 0x53, "PUSH3", None,
            Push4 = 0x54, "PUSH4", None,
            Push5 = 0x55, "PUSH5", None,
            Push6 = 0x56, "PUSH6", None,
            Push7 = 0x57, "PUSH7", None,
            Push8 = 0x58, "PUSH8", None,
            Push9 = 0x59, "PUSH9", None,
            Push10 = 0x5a, "PUSH10", None,
            Push11 = 0x5b, "PUSH11", None,
            Push12 = 0x5c, "PUSH12", None,
            Push13 = 0x5d, "PUSH13", None,
            Push14 = 0x5e, "PUSH14", None,
            Push15 = 0x5f, "PUSH15", None,
            /// Push the integer 16.
            Push16 = 0x60, "PUSH16", None,
            // =========================
            // Control flow
            // =========================
            /// No operation.
            Nop = 0x61, "NOP", None,
            /// Unconditional jump, 2-byte offset.
            Jmp = 0x62, "JMP", Off(2),
            /// Jump if the popped condition is truthy.
            JmpIf = 0x63, "JMPIF", Off(2),
            /// Jump if the popped condition is falsy.
            JmpIfNot = 0x64, "JMPIFNOT", Off(2),
            /// Call a script-local subroutine.
            Call = 0x65, "CALL", Off(2),
            /// Return from the current context.
            Ret = 0x66, "RET", None,
            /// Call another contract by script hash (zero hash = dynamic).
            AppCall = 0x67, "APPCALL", Hash20,
            /// Invoke a host interop function by id.
            Syscall = 0x68, "SYSCALL", Sys4,
            /// Unconditional jump, 4-byte offset.
            JmpL = 0x69, "JMP_L", Off(4),
            /// Duplicate the top of the alt stack onto the main stack.
            DupFromAltStack = 0x6a, "DUPFROMALTSTACK", None,
            /// Move the top item to the alt stack.
            ToAltStack = 0x6b, "TOALTSTACK", None,
            /// Move the top of the alt stack back to the main stack.
            FromAltStack = 0x6c, "FROMALTSTACK", None,
            /// Remove the item at depth n.
            XDrop = 0x6d, "XDROP", None,
            /// Conditional jump (truthy), 4-byte offset.
            JmpIfL = 0x6e, "JMPIF_L", Off(4),
            /// Conditional jump (falsy), 4-byte offset.
            JmpIfNotL = 0x6f, "JMPIFNOT_L", Off(4),
            // =========================
            // Stack manipulation
            // =========================
            /// Swap the top item with the item at depth n.
            XSwap = 0x72, "XSWAP", None,
            /// Insert a copy of the top item at depth n.
            XTuck = 0x73, "XTUCK", None,
            /// Push the current stack depth.
            Depth = 0x74, "DEPTH", None,
            /// Remove the top item.
            Drop = 0x75, "DROP", None,
            /// Duplicate the top item.
            Dup = 0x76, "DUP", None,
            /// Remove the second item.
            Nip = 0x77, "NIP", None,
            /// Copy the second item to the top.
            Over = 0x78, "OVER", None,
            /// Copy the item at depth n to the top.
            Pick = 0x79, "PICK", None,
            /// Move the item at depth n to the top.
            Roll = 0x7a, "ROLL", None,
            /// Rotate the top three items.
            Rot = 0x7b, "ROT", None,
            /// Swap the top two items.
            Swap = 0x7c, "SWAP", None,
            /// Copy the top item below the second item.
            Tuck = 0x7d, "TUCK", None,
            // =========================
            // Byte strings
            // =========================
            /// Concatenate two byte strings.
            Cat = 0x7e, "CAT", None,
            /// Extract a substring (index, count).
            SubStr = 0x7f, "SUBSTR", None,
            /// Keep the leftmost n bytes.
            Left = 0x80, "LEFT", None,
            /// Keep the rightmost n bytes.
            Right = 0x81, "RIGHT", None,
            /// Byte length or element count of the top item.
            Size = 0x82, "SIZE", None,
            // =========================
            // Bitwise
            // =========================
            /// Bitwise complement.
            Invert = 0x83, "INVERT", None,
            And = 0x84, "AND", None,
            Or = 0x85, "OR", None,
            Xor = 0x86, "XOR", None,
            /// Byte-wise equality (reference equality for compounds).
            Equal = 0x87, "EQUAL", None,
            // =========================
            // Arithmetic
            // =========================
            /// Increment by one.
            Inc = 0x8b, "INC", None,
            /// Decrement by one.
            Dec = 0x8c, "DEC", None,
            /// Sign of the operand (-1, 0, 1).
            Sign = 0x8d, "SIGN", None,
            Negate = 0x8f, "NEGATE", None,
            Abs = 0x90, "ABS", None,
            /// Boolean negation.
            Not = 0x91, "NOT", None,
            /// True if the operand is nonzero.
            Nz = 0x92, "NZ", None,
            Add = 0x93, "ADD", None,
            Sub = 0x94, "SUB", None,
            Mul = 0x95, "MUL", None,
            /// Truncated division; faults on division by zero.
            Div = 0x96, "DIV", None,
            Mod = 0x97, "MOD", None,
            Shl = 0x98, "SHL", None,
            /// Arithmetic shift right.
            Shr = 0x99, "SHR", None,
            BoolAnd = 0x9a, "BOOLAND", None,
            BoolOr = 0x9b, "BOOLOR", None,
            NumEqual = 0x9c, "NUMEQUAL", None,
            NumNotEqual = 0x9e, "NUMNOTEQUAL", None,
            Lt = 0x9f, "LT", None,
            Gt = 0xa0, "GT", None,
            Lte = 0xa1, "LTE", None,
            Gte = 0xa2, "GTE", None,
            Min = 0xa3, "MIN", None,
            Max = 0xa4, "MAX", None,
            /// True if a <= x < b.
            Within = 0xa5, "WITHIN", None,
            // =========================
            // Crypto
            // =========================
            Sha1 = 0xa7, "SHA1", None,
            Sha256 = 0xa8, "SHA256", None,
            /// RIPEMD-160 of SHA-256.
            Hash160 = 0xa9, "HASH160", None,
            /// Double SHA-256.
            Hash256 = 0xaa, "HASH256", None,
            /// Verify a signature over the engine's checked hash.
            CheckSig = 0xac, "CHECKSIG", None,
            /// Verify a signature over an explicit message.
            Verify = 0xad, "VERIFY", None,
            /// Verify m-of-n signatures over the engine's checked hash.
            CheckMultiSig = 0xae, "CHECKMULTISIG", None,
            // =========================
            // Compound types
            // =========================
            /// Pop n items into a new array (top becomes element 0).
            Pack = 0xc1, "PACK", None,
            /// Push an array's elements then its length.
            Unpack = 0xc2, "UNPACK", None,
            /// Read an element or map entry.
            PickItem = 0xc3, "PICKITEM", None,
            /// Write an element or map entry (structs copy on insert).
            SetItem = 0xc4, "SETITEM", None,
            /// New array of n nulls.
            NewArray = 0xc5, "NEWARRAY", None,
            /// New struct of n nulls.
            NewStruct = 0xc6, "NEWSTRUCT", None,
            /// New empty map.
            NewMap = 0xc7, "NEWMAP", None,
            /// Append to an array or struct (structs copy on insert).
            Append = 0xc8, "APPEND", None,
            /// Reverse an array or struct in place.
            ReverseItems = 0xc9, "REVERSEITEMS", None,
            /// Remove an element or map entry.
            Remove = 0xca, "REMOVE", None,
            /// Membership test for an index or map key.
            HasKey = 0xcb, "HASKEY", None,
            /// Push an array of a map's keys.
            Keys = 0xcc, "KEYS", None,
            /// Push an array of a map's or array's values.
            Values = 0xcd, "VALUES", None,
            /// New empty array.
            NewArray0 = 0xce, "NEWARRAY0", None,
            /// New array of n default values of the operand type.
            NewArrayT = 0xcf, "NEWARRAYT", Type1,
            /// New empty struct.
            NewStruct0 = 0xd0, "NEWSTRUCT0", None,
            /// Clear an array, struct or map.
            ClearItems = 0xd1, "CLEARITEMS", None,
            // =========================
            // Type tests
            // =========================
            /// True if the top item is null.
            IsNull = 0xd8, "ISNULL", None,
            /// True if the top item has the operand type.
            IsType = 0xd9, "ISTYPE", Type1,
            // =========================
            // Exceptions
            // =========================
            /// Unconditional fault.
            Throw = 0xf0, "THROW", None,
            /// Fault if the popped condition is falsy.
            ThrowIfNot = 0xf1, "THROWIFNOT", None,
        }
    };
}

macro_rules! define_opcodes {
    (
        $(
            $(#[$doc:meta])*
            $name:ident = $value:literal, $mnemonic:literal, $operand:ident $(($width:expr))?,
        )*
    ) => {
        /// A VM opcode.
        #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
        #[repr(u8)]
        pub enum OpCode {
            $(
                $(#[$doc])*
                $name = $value,
            )*
        }

        impl TryFrom<u8> for OpCode {
            type Error = VmError;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $( $value => Ok(OpCode::$name), )*
                    _ => Err(VmError::InvalidOpcode(value)),
                }
            }
        }

        impl OpCode {
            /// Returns the assembly mnemonic for this opcode.
            pub const fn mnemonic(&self) -> &'static str {
                match self {
                    $( OpCode::$name => $mnemonic, )*
                }
            }

            /// Returns the inline operand shape for this opcode.
            pub const fn operand(&self) -> OperandKind {
                match self {
                    $( OpCode::$name => OperandKind::$operand $(($width))?, )*
                }
            }
        }
    };
}

for_each_opcode!(define_opcodes);

impl OpCode {
    /// For `PUSH0`..`PUSH16` and `PUSHM1`, the pushed constant.
    pub const fn embedded_int(&self) -> Option<i8> {
        let value = *self as u8;
        match value {
            0x00 => Some(0),
            0x4f => Some(-1),
            0x51..=0x60 => Some((value - 0x50) as i8),
            _ => None,
        }
    }
}

impl std::fmt::Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mnemonic())
    }
}
